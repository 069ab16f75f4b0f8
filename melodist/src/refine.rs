// Corpus-distance refinement: a bounded hill climb over finished voices.
//
// The objective is a diagonal-Gaussian Fréchet distance between summary
// statistics of the phrase and of a reference corpus, over three features:
// pitch, absolute melodic interval, and duration in quarter notes. For one
// feature with fitted (mean, std) pairs a and b the distance is
// (μa - μb)² + (σa - σb)², summed over the features.
//
// Each iteration samples a small fraction of the editable notes, proposes a
// different pitch from the pool that step originally drew from, and keeps the
// substitution only if the distance drops and the column stays valid (no
// crossing, spacing within an octave, no new parallel fifths/octaves). The
// first note and the locked tail of every voice are never touched. The loop
// ends after the iteration budget or the first iteration with no accepted
// move.

use crate::error::{GenError, Result};
use crate::pitch::interval;
use crate::polyphony::column_is_valid;
use log::debug;
use melodist_prng::PhraseRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub iterations: usize,
    /// Share of all notes proposed for substitution per iteration.
    pub fraction: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            iterations: 8,
            fraction: 0.05,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(GenError::config(format!(
                "refinement fraction {} must be in (0, 1]",
                self.fraction
            )));
        }
        Ok(())
    }
}

/// Mean and population standard deviation of one feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
}

impl FeatureStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return FeatureStats::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        FeatureStats {
            mean,
            std: var.sqrt(),
        }
    }

    fn distance(&self, other: &FeatureStats) -> f64 {
        (self.mean - other.mean).powi(2) + (self.std - other.std).powi(2)
    }
}

/// A comparable note sequence: MIDI pitches and durations in quarter notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSequence {
    pub pitches: Vec<u8>,
    pub durations: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCorpus {
    pub sequences: Vec<ReferenceSequence>,
}

impl ReferenceCorpus {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

/// Summary statistics of a corpus or a phrase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub pitch: FeatureStats,
    pub interval: FeatureStats,
    pub duration: FeatureStats,
}

impl CorpusStats {
    pub fn from_corpus(corpus: &ReferenceCorpus) -> Result<Self> {
        let mut pitches = Vec::new();
        let mut intervals = Vec::new();
        let mut durations = Vec::new();
        for seq in &corpus.sequences {
            pitches.extend(seq.pitches.iter().map(|&p| p as f64));
            intervals.extend(
                seq.pitches
                    .windows(2)
                    .map(|w| interval::semitones(w[0], w[1]).unsigned_abs() as f64),
            );
            durations.extend(seq.durations.iter().copied());
        }
        if pitches.is_empty() {
            return Err(GenError::config("reference corpus has no notes"));
        }
        if durations.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(GenError::config("reference durations must be positive"));
        }
        Ok(CorpusStats {
            pitch: FeatureStats::from_values(&pitches),
            interval: FeatureStats::from_values(&intervals),
            duration: FeatureStats::from_values(&durations),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Statistics of an ascending C major scale in quarter notes, the
    /// reference when the caller supplies none.
    pub fn default_reference() -> Self {
        let corpus = ReferenceCorpus {
            sequences: vec![ReferenceSequence {
                pitches: vec![60, 62, 64, 65, 67, 69, 71, 72],
                durations: vec![1.0; 8],
            }],
        };
        let pitches: Vec<f64> = corpus.sequences[0].pitches.iter().map(|&p| p as f64).collect();
        let intervals: Vec<f64> = corpus.sequences[0]
            .pitches
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64)
            .collect();
        CorpusStats {
            pitch: FeatureStats::from_values(&pitches),
            interval: FeatureStats::from_values(&intervals),
            duration: FeatureStats::from_values(&corpus.sequences[0].durations),
        }
    }
}

/// Statistics of a set of voices sharing one rhythm (durations in quarters).
pub fn phrase_stats(voices: &[Vec<u8>], durations: &[f64]) -> CorpusStats {
    let pitches: Vec<f64> = voices.iter().flatten().map(|&p| p as f64).collect();
    let intervals: Vec<f64> = voices
        .iter()
        .flat_map(|v| {
            v.windows(2)
                .map(|w| interval::semitones(w[0], w[1]).unsigned_abs() as f64)
        })
        .collect();
    CorpusStats {
        pitch: FeatureStats::from_values(&pitches),
        interval: FeatureStats::from_values(&intervals),
        duration: FeatureStats::from_values(durations),
    }
}

pub fn frechet_distance(a: &CorpusStats, b: &CorpusStats) -> f64 {
    a.pitch.distance(&b.pitch) + a.interval.distance(&b.interval) + a.duration.distance(&b.duration)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefineReport {
    pub iterations: usize,
    pub proposals: usize,
    pub accepted: usize,
    pub initial_distance: f64,
    pub final_distance: f64,
}

/// Notes that may be rewritten, and how the phrase is judged.
pub struct RefineInput<'a> {
    pub durations: &'a [f64],
    pub pools: &'a [Vec<Arc<[u8]>>],
    pub target: &'a CorpusStats,
    pub allow_unison: bool,
    /// Trailing columns that are never rewritten (at least the cadence).
    pub locked_tail: usize,
}

pub fn refine(
    voices: &mut [Vec<u8>],
    input: &RefineInput,
    config: &RefineConfig,
    rng: &mut PhraseRng,
) -> RefineReport {
    let mut distance = frechet_distance(&phrase_stats(voices, input.durations), input.target);
    let mut report = RefineReport {
        initial_distance: distance,
        final_distance: distance,
        ..RefineReport::default()
    };

    let n = voices.iter().map(Vec::len).min().unwrap_or(0);
    let last_editable = n.saturating_sub(input.locked_tail.max(1));
    let editable: Vec<(usize, usize)> = (0..voices.len())
        .flat_map(|v| (1..last_editable).map(move |j| (v, j)))
        .collect();
    if editable.is_empty() {
        return report;
    }
    let total_notes = voices.len() * n;
    let per_iteration = ((total_notes as f64 * config.fraction).floor() as usize)
        .clamp(1, editable.len());

    for _ in 0..config.iterations {
        report.iterations += 1;
        let mut accepted_this_round = 0;
        for pick in rng.sample_indices(editable.len(), per_iteration) {
            let (v, j) = editable[pick];
            let Some(pool) = input.pools.get(v).and_then(|p| p.get(j)) else {
                continue;
            };
            let Some(&proposal) = rng.choose(pool) else {
                continue;
            };
            report.proposals += 1;
            let current = voices[v][j];
            if proposal == current {
                continue;
            }
            voices[v][j] = proposal;
            let keep = substitution_is_legal(voices, v, j, input.allow_unison) && {
                let candidate =
                    frechet_distance(&phrase_stats(voices, input.durations), input.target);
                if candidate < distance {
                    distance = candidate;
                    true
                } else {
                    false
                }
            };
            if keep {
                accepted_this_round += 1;
            } else {
                voices[v][j] = current;
            }
        }
        report.accepted += accepted_this_round;
        if accepted_this_round == 0 {
            break;
        }
    }

    report.final_distance = distance;
    debug!(
        "refinement: {} accepted of {} proposals, distance {:.3} -> {:.3}",
        report.accepted, report.proposals, report.initial_distance, report.final_distance
    );
    report
}

/// The column at `j` stays valid and voice `v` forms no parallel perfect
/// interval with its neighbours into or out of `j`.
fn substitution_is_legal(voices: &[Vec<u8>], v: usize, j: usize, allow_unison: bool) -> bool {
    let column: Vec<u8> = voices.iter().map(|voice| voice[j]).collect();
    if !column_is_valid(&column, allow_unison) {
        return false;
    }
    let neighbours = [v.checked_sub(1), Some(v + 1).filter(|&w| w < voices.len())];
    for w in neighbours.into_iter().flatten() {
        let (upper, lower) = if w < v {
            (&voices[w], &voices[v])
        } else {
            (&voices[v], &voices[w])
        };
        for k in [j, j + 1] {
            if k >= 1
                && k < upper.len()
                && interval::is_parallel_perfect(upper[k - 1], lower[k - 1], upper[k], lower[k])
            {
                return false;
            }
        }
    }
    true
}
