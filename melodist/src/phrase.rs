// The finished phrase: tick-based note records per voice.
//
// A `Note` carries its onset and duration in ticks (1920 per whole note) and
// exposes them as reduced whole-note fractions for the external serializer.
// `Phrase` bundles the voices with the harmony they were generated over, the
// plan, and a report of what the pipeline did (fallbacks, corrections,
// refinement).
//
// Velocity follows the tension curve: 56 + round(40 * tension), plus 8 on
// strong beats, clamped to 1..=127.

use crate::mode::Key;
use crate::pitch::note_name;
use crate::planner::PhrasePlan;
use crate::polyphony::{VoiceRole, VoicingReport, count_parallels};
use crate::refine::RefineReport;
use crate::rhythm::{Meter, TICKS_PER_WHOLE};
use crate::timeline::ChordSpan;
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE_VELOCITY: f64 = 56.0;
const TENSION_VELOCITY: f64 = 40.0;
const ACCENT_VELOCITY: f64 = 8.0;

/// A non-negative rational in lowest terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        let g = gcd(numerator, denominator).max(1);
        Fraction {
            numerator: numerator / g,
            denominator: denominator / g,
        }
    }

    pub fn to_f64(self) -> f64 {
        self.numerator as f64 / self.denominator.max(1) as f64
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    /// Onset in ticks from the start of the phrase.
    pub start: u32,
    pub duration: u32,
    pub velocity: u8,
    pub voice: usize,
}

impl Note {
    /// Onset as a fraction of a whole note.
    pub fn start_whole(&self) -> Fraction {
        Fraction::new(self.start, TICKS_PER_WHOLE)
    }

    /// Duration as a fraction of a whole note.
    pub fn duration_fraction(&self) -> Fraction {
        Fraction::new(self.duration, TICKS_PER_WHOLE)
    }

    /// Onset in beats of `meter`.
    pub fn start_beat(&self, meter: &Meter) -> f64 {
        self.start as f64 / meter.beat_ticks() as f64
    }

    pub fn name(&self) -> String {
        note_name(self.pitch)
    }
}

/// Velocity for a note at `tension`, accented on strong beats.
pub fn velocity(tension: f64, strong: bool) -> u8 {
    let accent = if strong { ACCENT_VELOCITY } else { 0.0 };
    let raw = BASE_VELOCITY + (TENSION_VELOCITY * tension.clamp(0.0, 1.0)).round() + accent;
    raw.clamp(1.0, 127.0) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceLine {
    pub role: VoiceRole,
    pub notes: Vec<Note>,
}

impl VoiceLine {
    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.pitch).collect()
    }
}

/// What the pipeline did while building a phrase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub voicing: VoicingReport,
    pub refinement: Option<RefineReport>,
    pub uniform_fallbacks: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub key: Key,
    pub meter: Meter,
    pub seed: u64,
    pub chords: Vec<ChordSpan>,
    pub plan: PhrasePlan,
    /// Top voice (melody) first.
    pub voices: Vec<VoiceLine>,
    pub report: GenerationReport,
}

impl Phrase {
    pub fn melody(&self) -> &VoiceLine {
        &self.voices[0]
    }

    /// Every note, ordered by onset and then by voice.
    pub fn notes(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self.voices.iter().flat_map(|v| v.notes.iter().copied()).collect();
        notes.sort_by_key(|n| (n.start, n.voice));
        notes
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Compact text rendering for debugging: a chord row, then one row per
    /// voice with note names and bar lines.
    pub fn summary(&self) -> String {
        let bar = self.meter.bar_ticks();
        let mut out = String::new();
        out.push_str(&format!("{:>14}: ", "chords"));
        for (i, span) in self.chords.iter().enumerate() {
            if i > 0 && span.start % bar == 0 {
                out.push_str("| ");
            }
            out.push_str(&span.chord.symbol());
            out.push(' ');
        }
        out.push('\n');
        for voice in &self.voices {
            out.push_str(&format!("{:>14}: ", voice.role.to_string()));
            for (i, note) in voice.notes.iter().enumerate() {
                if i > 0 && note.start % bar == 0 {
                    out.push_str("| ");
                }
                out.push_str(&note.name());
                out.push(' ');
            }
            out.push('\n');
        }
        out
    }

    pub fn stats(&self) -> PhraseStats {
        let lines: Vec<Vec<u8>> = self.voices.iter().map(VoiceLine::pitches).collect();
        let mut leaps = 0;
        let mut steps = 0;
        let mut repeats = 0;
        for line in &lines {
            for pair in line.windows(2) {
                match pair[0].abs_diff(pair[1]) {
                    0 => repeats += 1,
                    1 | 2 => steps += 1,
                    d if d >= 7 => leaps += 1,
                    _ => {}
                }
            }
        }
        let all = lines.iter().flatten();
        PhraseStats {
            voices: self.voices.len(),
            notes: lines.iter().map(Vec::len).sum(),
            lowest: all.clone().min().copied(),
            highest: all.max().copied(),
            steps,
            leaps,
            repeats,
            parallels: count_parallels(&lines),
        }
    }
}

/// Statistics about a phrase's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseStats {
    pub voices: usize,
    pub notes: usize,
    pub lowest: Option<u8>,
    pub highest: Option<u8>,
    pub steps: usize,
    pub leaps: usize,
    pub repeats: usize,
    pub parallels: usize,
}
