// Harmony generator: a chord progression when the caller supplies none.
//
// Chords are chosen as scale degrees of the key (0 = I) and realized with
// `Chord::diatonic`. A `ProgressionModel` may score the next degree given the
// degrees so far; when no model is attached, or it returns nothing usable for
// a slot, the rule-based fallback supplies the degree from a common
// Roman-numeral loop (I–IV–V–I, I–vi–IV–V, I–vi–ii–V and friends).
//
// Durations come from a harmonic-rhythm pattern measured in whole bars, so
// every chord change lands on a downbeat. The spans tile `[0, end)` exactly:
// the last span is cut at `end`.

use crate::chord::Chord;
use crate::error::{GenError, Result};
use crate::mode::Key;
use crate::rhythm::Meter;
use crate::timeline::ChordSpan;
use log::{debug, warn};
use melodist_prng::PhraseRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// Number of diatonic degrees a progression model scores.
pub const DEGREES: usize = 7;

/// Degree loops for major-type keys.
pub const MAJOR_PATTERNS: &[&[usize]] = &[
    &[0, 3, 4, 0],
    &[0, 5, 3, 4],
    &[0, 3, 0, 4],
    &[0, 5, 1, 4],
];

/// Degree loops for minor-type keys.
pub const MINOR_PATTERNS: &[&[usize]] = &[&[0, 3, 4, 0], &[0, 5, 3, 4], &[0, 5, 4, 0]];

/// Chord lengths in bars.
pub const HARMONIC_RHYTHMS: &[&[u32]] = &[&[1, 1, 1, 1], &[2, 1, 1], &[1, 2, 1], &[1, 1, 2]];

/// Scores the next scale degree of a progression.
pub trait ProgressionModel: Debug + Send + Sync {
    /// Non-negative weight per degree (index 0 = I). Shorter vectors leave
    /// the missing degrees at zero; an empty or all-zero vector defers to the
    /// rule-based progression.
    fn predict(&self, history: &[usize]) -> Vec<f64>;
}

/// First-order Markov model over diatonic degrees, with a unigram fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordMarkovModel {
    /// previous degree → next degree → weight
    pub transitions: BTreeMap<u8, BTreeMap<u8, f64>>,
    #[serde(default)]
    pub unigram: BTreeMap<u8, f64>,
}

impl ChordMarkovModel {
    /// Functional-harmony defaults: tonic to predominant to dominant to tonic.
    pub fn default_model() -> Self {
        let rows: &[(u8, &[(u8, f64)])] = &[
            (0, &[(3, 3.0), (4, 3.0), (5, 2.0), (1, 1.5), (2, 0.5)]),
            (1, &[(4, 4.0), (6, 1.0)]),
            (2, &[(5, 2.0), (3, 2.0)]),
            (3, &[(4, 3.0), (0, 2.0), (1, 1.0)]),
            (4, &[(0, 4.0), (5, 1.5)]),
            (5, &[(1, 2.0), (3, 2.5), (4, 1.0)]),
            (6, &[(0, 3.0)]),
        ];
        let transitions = rows
            .iter()
            .map(|(from, row)| (*from, row.iter().copied().collect()))
            .collect();
        let unigram = [(0, 4.0), (3, 3.0), (4, 3.0), (5, 2.0), (1, 1.0)]
            .into_iter()
            .collect();
        ChordMarkovModel {
            transitions,
            unigram,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: ChordMarkovModel = serde_json::from_str(json)?;
        let degrees = model
            .transitions
            .iter()
            .flat_map(|(from, row)| std::iter::once(from).chain(row.keys()))
            .chain(model.unigram.keys());
        for &degree in degrees {
            if degree as usize >= DEGREES {
                return Err(GenError::config(format!(
                    "chord model degree {degree} is outside 0..{DEGREES}"
                )));
            }
        }
        let mut weights = model
            .transitions
            .values()
            .flat_map(BTreeMap::values)
            .chain(model.unigram.values());
        if weights.any(|w| !w.is_finite() || *w < 0.0) {
            return Err(GenError::config(
                "chord model weights must be finite and non-negative",
            ));
        }
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

impl ProgressionModel for ChordMarkovModel {
    fn predict(&self, history: &[usize]) -> Vec<f64> {
        let row = history
            .last()
            .and_then(|&d| self.transitions.get(&(d as u8)))
            .filter(|row| !row.is_empty())
            .unwrap_or(&self.unigram);
        let mut scores = vec![0.0; DEGREES];
        for (&degree, &weight) in row {
            if let Some(slot) = scores.get_mut(degree as usize) {
                *slot = weight.max(0.0);
            }
        }
        scores
    }
}

pub struct HarmonyGenerator<'a> {
    key: Key,
    model: Option<&'a dyn ProgressionModel>,
}

impl<'a> HarmonyGenerator<'a> {
    pub fn new(key: Key, model: Option<&'a dyn ProgressionModel>) -> Self {
        HarmonyGenerator { key, model }
    }

    /// The degree sequence for `count` chords.
    pub fn degrees(&self, count: usize, rng: &mut PhraseRng) -> Vec<usize> {
        let patterns = if self.key.mode.is_minor() {
            MINOR_PATTERNS
        } else {
            MAJOR_PATTERNS
        };
        let pattern = rng.choose(patterns).copied().unwrap_or(&[0]);
        let mut degrees: Vec<usize> = Vec::with_capacity(count);
        for i in 0..count {
            let rule = pattern[i % pattern.len()];
            let degree = match self.model {
                // The progression always opens on the tonic.
                Some(model) if i > 0 => {
                    let mut scores = model.predict(&degrees);
                    scores.truncate(DEGREES);
                    match rng.weighted_index(&scores) {
                        Some(d) => d,
                        None => {
                            warn!("progression model gave no usable scores at chord {i}; using rule-based degree");
                            rule
                        }
                    }
                }
                _ => rule,
            };
            degrees.push(degree);
        }
        degrees
    }

    /// Chord spans tiling `[0, end)`, changing only on bar lines.
    pub fn generate(&self, end: u32, meter: &Meter, rng: &mut PhraseRng) -> Vec<ChordSpan> {
        let bar = meter.bar_ticks();
        let rhythm = rng.choose(HARMONIC_RHYTHMS).copied().unwrap_or(&[1]);

        let mut lengths = Vec::new();
        let mut start = 0u32;
        for &bars in rhythm.iter().cycle() {
            if start >= end {
                break;
            }
            let length = (bars * bar).min(end - start);
            lengths.push(length);
            start += length;
        }

        let degrees = self.degrees(lengths.len(), rng);
        let mut spans = Vec::with_capacity(lengths.len());
        let mut start = 0u32;
        for (&length, &degree) in lengths.iter().zip(&degrees) {
            spans.push(ChordSpan {
                chord: Chord::diatonic(&self.key, degree),
                start,
                duration: length,
            });
            start += length;
        }
        debug!(
            "generated progression: {}",
            spans
                .iter()
                .map(|s| s.chord.symbol())
                .collect::<Vec<_>>()
                .join(" ")
        );
        spans
    }
}
