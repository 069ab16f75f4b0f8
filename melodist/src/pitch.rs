// Pitch and interval helpers shared by every layer of the generator.
//
// Pitches are MIDI numbers (0-127, C4 = 60). Pitch classes are 0-11 with
// C = 0. Interval helpers work on signed semitone distances; "interval class"
// folds direction and octave away. Name parsing accepts both sharp and flat
// spellings; name rendering always uses sharps.
//
// `OctaveRange` is the register a voice is confined to. Octave `o` spans MIDI
// `12(o+1) ..= 12(o+1)+11`, so octave 4 starts at middle C.

use crate::error::{GenError, Result};
use serde::{Deserialize, Serialize};

/// Lowest octave a range may start at.
pub const MIN_OCTAVE: u8 = 0;
/// Highest octave a range may reach.
pub const MAX_OCTAVE: u8 = 8;

/// Sharp spellings indexed by pitch class.
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Parse a pitch-class name such as `C`, `f#`, `Bb`, `E#` or `Cb`.
pub fn parse_pitch_class(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let natural: i8 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let mut alter: i8 = 0;
    for c in chars {
        match c {
            '#' | '♯' => alter += 1,
            'b' | '♭' => alter -= 1,
            _ => return None,
        }
    }
    Some((natural + alter).rem_euclid(12) as u8)
}

/// Split a leading pitch-class name off a symbol, returning the pitch class
/// and the unparsed remainder. `"F#m7"` → `(6, "m7")`.
pub fn split_pitch_class(symbol: &str) -> Option<(u8, &str)> {
    let first = symbol.chars().next()?;
    if !matches!(first.to_ascii_uppercase(), 'A'..='G') {
        return None;
    }
    let mut end = first.len_utf8();
    if let Some(c) = symbol[end..].chars().next()
        && matches!(c, '#' | 'b' | '♯' | '♭')
    {
        end += c.len_utf8();
    }
    let pc = parse_pitch_class(&symbol[..end])?;
    Some((pc, &symbol[end..]))
}

/// Render a MIDI pitch as a note name, e.g. `60` → `"C4"`, `61` → `"C#4"`.
pub fn note_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", PITCH_CLASS_NAMES[(pitch % 12) as usize], octave)
}

/// Parse a note name with octave (`"C#4"`, `"Bb3"`, `"C-1"`) into a MIDI pitch.
pub fn parse_note(name: &str) -> Option<u8> {
    let (pc, rest) = split_pitch_class(name)?;
    let octave: i32 = rest.parse().ok()?;
    let midi = (octave + 1) * 12 + pc as i32;
    u8::try_from(midi).ok().filter(|&p| p <= 127)
}

/// The pitch class of a MIDI pitch.
pub fn pitch_class(pitch: u8) -> u8 {
    pitch % 12
}

/// Inclusive octave range `min..=max` with `MIN_OCTAVE <= min < max <= MAX_OCTAVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OctaveRange {
    pub min: u8,
    pub max: u8,
}

impl OctaveRange {
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min >= max || max > MAX_OCTAVE {
            return Err(GenError::config(format!(
                "octave range ({min}, {max}) must satisfy {MIN_OCTAVE} <= min < max <= {MAX_OCTAVE}"
            )));
        }
        Ok(OctaveRange { min, max })
    }

    /// Lowest MIDI pitch in the range (C of `min`).
    pub fn low_pitch(&self) -> u8 {
        12 * (self.min + 1)
    }

    /// Highest MIDI pitch in the range (B of `max`, clamped to 127).
    pub fn high_pitch(&self) -> u8 {
        (12 * (self.max as u16 + 1) + 11).min(127) as u8
    }

    pub fn contains(&self, pitch: u8) -> bool {
        (self.low_pitch()..=self.high_pitch()).contains(&pitch)
    }

    /// The range moved by `octaves`, or `None` if it would leave 0..=8.
    pub fn shifted(&self, octaves: i8) -> Option<OctaveRange> {
        let min = self.min as i16 + octaves as i16;
        let max = self.max as i16 + octaves as i16;
        if min < MIN_OCTAVE as i16 || max > MAX_OCTAVE as i16 {
            return None;
        }
        Some(OctaveRange {
            min: min as u8,
            max: max as u8,
        })
    }

    /// The range with its lower bound dropped by one octave where possible.
    pub fn extended_down(&self) -> OctaveRange {
        OctaveRange {
            min: self.min.saturating_sub(1),
            max: self.max,
        }
    }

    /// Pitch bounds widened by `octaves` on each side, clamped to MIDI.
    pub fn tolerance_bounds(&self, octaves: u8) -> (u8, u8) {
        let pad = 12 * octaves as i16;
        let low = (self.low_pitch() as i16 - pad).max(0) as u8;
        let high = (self.high_pitch() as i16 + pad).min(127) as u8;
        (low, high)
    }
}

/// Musical interval helpers.
pub mod interval {
    /// Melodic intervals of this many semitones or more count as leaps.
    pub const LEAP_SEMITONES: u8 = 7;

    /// Signed distance from `from` to `to`. Positive means `to` is higher.
    pub fn semitones(from: u8, to: u8) -> i16 {
        to as i16 - from as i16
    }

    /// Direction of motion: -1, 0 or +1.
    pub fn direction(from: u8, to: u8) -> i8 {
        semitones(from, to).signum() as i8
    }

    /// Interval class (0-6): the interval mod 12, folded at the tritone.
    pub fn interval_class(a: u8, b: u8) -> u8 {
        let ic = (semitones(a, b).unsigned_abs() % 12) as u8;
        if ic > 6 { 12 - ic } else { ic }
    }

    /// Perfect consonances: unison, fifth, octave (and compounds).
    pub fn is_perfect_consonance(semitones: i16) -> bool {
        matches!(semitones.unsigned_abs() % 12, 0 | 7)
    }

    /// Consonances: unison, thirds, fourth, fifth, sixths, octave.
    pub fn is_consonant(semitones: i16) -> bool {
        matches!(semitones.unsigned_abs() % 12, 0 | 3 | 4 | 5 | 7 | 8 | 9)
    }

    pub fn is_dissonant(semitones: i16) -> bool {
        !is_consonant(semitones)
    }

    pub fn is_leap(semitones: i16) -> bool {
        semitones.unsigned_abs() >= LEAP_SEMITONES as u16
    }

    pub fn is_tritone(semitones: i16) -> bool {
        semitones.unsigned_abs() == 6
    }

    /// Perceived tension of a melodic interval, in [0, 1].
    ///
    /// Coarse lookup on the interval mod 12; anything past the tritone gets a
    /// middling 0.5.
    pub fn tension(semitones: i16) -> f64 {
        match semitones.unsigned_abs() % 12 {
            0 => 0.0,
            1 => 0.2,
            2 => 0.4,
            3 => 0.6,
            4 => 0.7,
            5 => 0.8,
            6 => 1.0,
            _ => 0.5,
        }
    }

    /// True if moving `(prev_a, prev_b)` → `(next_a, next_b)` forms parallel
    /// fifths or octaves: the same perfect interval class both times, reached
    /// with both voices moving the same way.
    pub fn is_parallel_perfect(prev_a: u8, prev_b: u8, next_a: u8, next_b: u8) -> bool {
        let before = semitones(prev_b, prev_a).unsigned_abs() % 12;
        let after = semitones(next_b, next_a).unsigned_abs() % 12;
        if !matches!(before, 0 | 7) || before != after {
            return false;
        }
        let dir_a = direction(prev_a, next_a);
        let dir_b = direction(prev_b, next_b);
        dir_a != 0 && dir_a == dir_b
    }
}
