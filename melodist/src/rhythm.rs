// Rhythm engine: onsets and durations, independent of pitch.
//
// Time is measured in ticks, `TICKS_PER_WHOLE` to the whole note, so every
// duration class in use (down to the sixteenth, dotted or not) is an exact
// integer and onsets never drift. A step's onset is a strong beat when it
// lands on a multiple of the meter's beat unit.
//
// Three sources produce the duration sequence:
// - `Library`: a pattern from `PATTERN_LIBRARY`, cycled to the note count;
// - `Markov`: a first-order walk over `DurationClass` using
//   `RhythmTransitions` (serde-loadable, with a built-in default table);
// - `Explicit`: caller-supplied whole-note fractions, cycled.
//
// The engine is deterministic for a given `PhraseRng` state.

use crate::error::{GenError, Result};
use melodist_prng::PhraseRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Ticks in one whole note (480 per quarter).
pub const TICKS_PER_WHOLE: u32 = 1920;

/// Longest single explicit duration, in whole notes.
pub const MAX_EXPLICIT_WHOLES: f64 = 64.0;

/// Upper bound on the length of one phrase, in ticks.
pub const MAX_PHRASE_TICKS: u32 = 1 << 30;

/// Tolerance for strong-beat tests on fractional (f64) positions.
pub const STRONG_BEAT_EPSILON: f64 = 1e-6;

/// Built-in duration patterns, as whole-note fractions.
pub const PATTERN_LIBRARY: &[&[f64]] = &[
    &[0.25, 0.25, 0.5],
    &[0.25, 0.75],
    &[0.5, 0.5],
    &[0.375, 0.375, 0.25],
    &[0.125, 0.125, 0.25, 0.5],
    &[0.0625; 8],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meter {
    numerator: u32,
    denominator: u32,
}

impl Meter {
    /// Validate a time signature. The numerator must be positive and the
    /// denominator a power of two from 1 to 32.
    pub fn new(numerator: i64, denominator: i64) -> Result<Meter> {
        let valid_denominator = matches!(denominator, 1 | 2 | 4 | 8 | 16 | 32);
        if numerator < 1 || numerator > 64 || !valid_denominator {
            return Err(GenError::InvalidMeter {
                numerator,
                denominator,
            });
        }
        Ok(Meter {
            numerator: numerator as u32,
            denominator: denominator as u32,
        })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Ticks in one beat unit.
    pub fn beat_ticks(&self) -> u32 {
        TICKS_PER_WHOLE / self.denominator
    }

    /// Ticks in one bar.
    pub fn bar_ticks(&self) -> u32 {
        self.beat_ticks() * self.numerator
    }

    /// Start tick of the bar containing `tick`.
    pub fn bar_start(&self, tick: u32) -> u32 {
        tick - tick % self.bar_ticks()
    }

    /// True if `tick` falls exactly on a beat.
    pub fn is_strong_beat(&self, tick: u32) -> bool {
        tick % self.beat_ticks() == 0
    }

    /// True if a position given in whole notes falls on a beat, within
    /// `STRONG_BEAT_EPSILON`.
    pub fn is_strong_position(&self, whole_notes: f64) -> bool {
        let beats = whole_notes * self.denominator as f64;
        (beats - beats.round()).abs() < STRONG_BEAT_EPSILON
    }
}

impl Default for Meter {
    fn default() -> Self {
        Meter {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Note-length classes used by the Markov rhythm source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationClass {
    Whole,
    DottedHalf,
    Half,
    DottedQuarter,
    Quarter,
    DottedEighth,
    Eighth,
    Sixteenth,
}

impl DurationClass {
    pub const ALL: [DurationClass; 8] = [
        DurationClass::Whole,
        DurationClass::DottedHalf,
        DurationClass::Half,
        DurationClass::DottedQuarter,
        DurationClass::Quarter,
        DurationClass::DottedEighth,
        DurationClass::Eighth,
        DurationClass::Sixteenth,
    ];

    pub fn ticks(self) -> u32 {
        match self {
            DurationClass::Whole => 1920,
            DurationClass::DottedHalf => 1440,
            DurationClass::Half => 960,
            DurationClass::DottedQuarter => 720,
            DurationClass::Quarter => 480,
            DurationClass::DottedEighth => 360,
            DurationClass::Eighth => 240,
            DurationClass::Sixteenth => 120,
        }
    }
}

/// First-order transition weights between duration classes. Weights need not
/// sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmTransitions {
    pub transitions: BTreeMap<DurationClass, BTreeMap<DurationClass, f64>>,
    /// Fixed first duration; a random table key when absent.
    #[serde(default)]
    pub start: Option<DurationClass>,
}

impl Default for RhythmTransitions {
    fn default() -> Self {
        use DurationClass::*;
        let table: &[(DurationClass, &[(DurationClass, f64)])] = &[
            (Quarter, &[(Quarter, 0.4), (Half, 0.3), (Eighth, 0.3), (DottedQuarter, 0.1)]),
            (Half, &[(Quarter, 0.6), (Half, 0.4)]),
            (Eighth, &[(Eighth, 0.5), (Quarter, 0.5)]),
            (DottedQuarter, &[(Eighth, 0.6), (Quarter, 0.4)]),
            (Whole, &[(Half, 0.5), (Quarter, 0.5)]),
            (DottedHalf, &[(Quarter, 1.0)]),
            (DottedEighth, &[(Sixteenth, 1.0)]),
            (Sixteenth, &[(Sixteenth, 0.6), (Eighth, 0.4)]),
        ];
        let transitions = table
            .iter()
            .map(|(from, row)| (*from, row.iter().copied().collect()))
            .collect();
        RhythmTransitions {
            transitions,
            start: None,
        }
    }
}

impl RhythmTransitions {
    pub fn from_json(json: &str) -> Result<Self> {
        let table: RhythmTransitions = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transitions.is_empty() {
            return Err(GenError::config("rhythm transition table is empty"));
        }
        let bad_weight = self
            .transitions
            .values()
            .flat_map(|row| row.values())
            .any(|w| !w.is_finite() || *w < 0.0);
        if bad_weight {
            return Err(GenError::config(
                "rhythm transition weights must be finite and non-negative",
            ));
        }
        Ok(())
    }

    /// Walk the chain for `length` steps.
    pub fn walk(&self, length: usize, rng: &mut PhraseRng) -> Vec<DurationClass> {
        let keys: Vec<DurationClass> = self.transitions.keys().copied().collect();
        let mut current = match self.start.or_else(|| rng.choose(&keys).copied()) {
            Some(start) => start,
            None => return vec![DurationClass::Quarter; length],
        };
        let mut out = Vec::with_capacity(length);
        while out.len() < length {
            out.push(current);
            let row = self.transitions.get(&current);
            let (choices, weights): (Vec<DurationClass>, Vec<f64>) = match row {
                Some(row) if !row.is_empty() => row.iter().map(|(d, w)| (*d, *w)).unzip(),
                // Dead end: restart uniformly from the table's keys.
                _ => keys.iter().map(|d| (*d, 1.0)).unzip(),
            };
            current = rng
                .weighted_index(&weights)
                .map(|i| choices[i])
                .unwrap_or(current);
        }
        out
    }
}

/// Where the duration sequence comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RhythmSource {
    #[default]
    Library,
    Markov,
    /// Whole-note fractions, cycled over the phrase.
    Explicit(Vec<f64>),
}

/// One rhythmic slot: onset, length and metric weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhythmStep {
    pub start: u32,
    pub duration: u32,
    pub strong: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RhythmEngine {
    pub source: RhythmSource,
    pub transitions: RhythmTransitions,
}

impl RhythmEngine {
    pub fn new(source: RhythmSource, transitions: RhythmTransitions) -> Self {
        RhythmEngine {
            source,
            transitions,
        }
    }

    /// Reject explicit patterns the engine cannot lay out.
    pub fn validate(&self) -> Result<()> {
        if let RhythmSource::Explicit(pattern) = &self.source {
            if pattern.is_empty() {
                return Err(GenError::config("rhythm pattern is empty"));
            }
            for &fraction in pattern {
                if !fraction.is_finite() || fraction <= 0.0 || fraction_to_ticks(fraction) == 0 {
                    return Err(GenError::config(format!(
                        "rhythm pattern value {fraction} is not a positive duration"
                    )));
                }
                if fraction > MAX_EXPLICIT_WHOLES {
                    return Err(GenError::config(format!(
                        "rhythm pattern value {fraction} is longer than {MAX_EXPLICIT_WHOLES} whole notes"
                    )));
                }
            }
        }
        if self.source == RhythmSource::Markov {
            self.transitions.validate()?;
        }
        Ok(())
    }

    /// Produce `note_count` contiguous steps starting at tick 0.
    pub fn generate(
        &self,
        note_count: usize,
        meter: &Meter,
        rng: &mut PhraseRng,
    ) -> Result<Vec<RhythmStep>> {
        self.validate()?;
        let durations: Vec<u32> = match &self.source {
            RhythmSource::Library => {
                let pattern = rng.choose(PATTERN_LIBRARY).copied().unwrap_or(&[0.25]);
                cycle_ticks(pattern, note_count)
            }
            RhythmSource::Explicit(pattern) => cycle_ticks(pattern, note_count),
            RhythmSource::Markov => self
                .transitions
                .walk(note_count, rng)
                .into_iter()
                .map(DurationClass::ticks)
                .collect(),
        };
        let total: u64 = durations.iter().map(|&d| u64::from(d)).sum();
        if total > u64::from(MAX_PHRASE_TICKS) {
            return Err(GenError::config(format!(
                "rhythm spans {total} ticks, more than {MAX_PHRASE_TICKS}"
            )));
        }
        Ok(lay_out(&durations, meter))
    }
}

fn fraction_to_ticks(fraction: f64) -> u32 {
    (fraction * TICKS_PER_WHOLE as f64).round() as u32
}

fn cycle_ticks(pattern: &[f64], count: usize) -> Vec<u32> {
    pattern
        .iter()
        .cycle()
        .take(count)
        .map(|&f| fraction_to_ticks(f))
        .collect()
}

/// Turn durations into contiguous steps, marking strong beats.
pub fn lay_out(durations: &[u32], meter: &Meter) -> Vec<RhythmStep> {
    let mut start = 0u32;
    durations
        .iter()
        .map(|&duration| {
            let step = RhythmStep {
                start,
                duration,
                strong: meter.is_strong_beat(start),
            };
            start += duration;
            step
        })
        .collect()
}
