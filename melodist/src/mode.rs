// Keys, modes and scales (the key/scale resolver).
//
// A `Key` is a tonic pitch class plus a `Mode`. Each mode is defined by its
// semitone pattern from the tonic; `Scale` is the resolved, ordered set of
// pitch classes (degree 0 first) and answers the membership, degree and
// snapping questions the rest of the pipeline asks.
//
// Pentatonic modes have five degrees. Anything that needs seven-degree
// harmony (diatonic triads, Roman-numeral progressions) goes through
// `Mode::heptatonic_parent`, so a pentatonic key borrows its triads from the
// major or natural-minor scale it was carved out of.
//
// Used by chord.rs (scale-for-chord), pool.rs (candidate pools), selector.rs
// (motif degree shifts) and harmony.rs (diatonic progressions).

use crate::error::{GenError, Result};
use crate::pitch::{PITCH_CLASS_NAMES, split_pitch_class};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    NaturalMinor,
    HarmonicMinor,
    MelodicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    MajorPentatonic,
    MinorPentatonic,
    /// Symmetric scale used under augmented chords; never a key mode.
    WholeTone,
}

impl Mode {
    /// Semitone offsets from the tonic to each degree.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            Mode::Major => &[0, 2, 4, 5, 7, 9, 11],
            Mode::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            Mode::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Mode::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            Mode::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Mode::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Mode::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Mode::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Mode::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Mode::MajorPentatonic => &[0, 2, 4, 7, 9],
            Mode::MinorPentatonic => &[0, 3, 5, 7, 10],
            Mode::WholeTone => &[0, 2, 4, 6, 8, 10],
        }
    }

    /// True for modes whose tonic triad is minor.
    pub fn is_minor(self) -> bool {
        self.intervals().contains(&3) && !self.intervals().contains(&4)
    }

    /// The seven-note mode used to build triads over this mode.
    pub fn heptatonic_parent(self) -> Mode {
        match self {
            Mode::MajorPentatonic | Mode::WholeTone => Mode::Major,
            Mode::MinorPentatonic => Mode::NaturalMinor,
            other => other,
        }
    }

    /// Parse a mode name. Accepts `_`, `-` and spaces between words.
    pub fn parse(name: &str) -> Option<Mode> {
        let normalized: String = name
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        let mode = match normalized.as_str() {
            "" | "major" | "maj" | "ionian" => Mode::Major,
            "m" | "minor" | "min" | "natural_minor" | "aeolian" => Mode::NaturalMinor,
            "harmonic_minor" => Mode::HarmonicMinor,
            "melodic_minor" => Mode::MelodicMinor,
            "dorian" => Mode::Dorian,
            "phrygian" => Mode::Phrygian,
            "lydian" => Mode::Lydian,
            "mixolydian" => Mode::Mixolydian,
            "locrian" => Mode::Locrian,
            "pentatonic" | "major_pentatonic" => Mode::MajorPentatonic,
            "minor_pentatonic" | "m_pentatonic" => Mode::MinorPentatonic,
            _ => return None,
        };
        Some(mode)
    }
}

/// A tonic plus a mode. Immutable once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub tonic: u8,
    pub mode: Mode,
}

impl Key {
    pub fn new(tonic: u8, mode: Mode) -> Self {
        Key {
            tonic: tonic % 12,
            mode,
        }
    }

    /// Parse `"C"`, `"Am"`, `"F#m"`, `"C_dorian"`, `"D dorian"`,
    /// `"A harmonic minor"` and similar spellings.
    pub fn parse(text: &str) -> Result<Key> {
        let trimmed = text.trim();
        let (tonic, rest) =
            split_pitch_class(trimmed).ok_or_else(|| GenError::InvalidKey(text.to_string()))?;
        let rest = rest.trim_start_matches(['_', ' ', '-']);
        let mode = Mode::parse(rest).ok_or_else(|| GenError::InvalidKey(text.to_string()))?;
        if mode == Mode::WholeTone {
            return Err(GenError::InvalidKey(text.to_string()));
        }
        Ok(Key::new(tonic, mode))
    }

    /// Resolve the ordered scale for this key.
    pub fn scale(&self) -> Scale {
        Scale::new(self.tonic, self.mode)
    }

    /// The seven-note scale this key's harmony is built from.
    pub fn harmonic_scale(&self) -> Scale {
        Scale::new(self.tonic, self.mode.heptatonic_parent())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", PITCH_CLASS_NAMES[self.tonic as usize], self.mode)
    }
}

/// An ordered set of pitch classes, degree 0 first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scale {
    pub tonic: u8,
    pub mode: Mode,
    degrees: Vec<u8>,
    mask: u16,
}

impl Scale {
    pub fn new(tonic: u8, mode: Mode) -> Self {
        let tonic = tonic % 12;
        let degrees: Vec<u8> = mode
            .intervals()
            .iter()
            .map(|&iv| (tonic + iv) % 12)
            .collect();
        let mask = degrees.iter().fold(0u16, |m, &pc| m | (1 << pc));
        Scale {
            tonic,
            mode,
            degrees,
            mask,
        }
    }

    /// Pitch classes in degree order.
    pub fn pitch_classes(&self) -> &[u8] {
        &self.degrees
    }

    /// Bitmask of member pitch classes (bit `pc` set when present).
    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degrees.is_empty()
    }

    /// Check if a MIDI pitch belongs to the scale.
    pub fn contains(&self, pitch: u8) -> bool {
        self.mask & (1 << (pitch % 12)) != 0
    }

    /// Scale degree (0-based) of a pitch, or `None` if it is not a member.
    pub fn degree_of(&self, pitch: u8) -> Option<usize> {
        self.degrees.iter().position(|&pc| pc == pitch % 12)
    }

    /// All member pitches in `[low, high]`, ascending.
    pub fn pitches_in_range(&self, low: u8, high: u8) -> Vec<u8> {
        (low..=high).filter(|&p| self.contains(p)).collect()
    }

    /// Move `steps` scale degrees from a member pitch (negative = down).
    ///
    /// A non-member pitch is snapped first. Returns `None` if the result would
    /// leave the MIDI range.
    pub fn step(&self, pitch: u8, steps: i32) -> Option<u8> {
        let start = self.snap(pitch);
        let degree = self.degree_of(start)? as i32;
        let n = self.len() as i32;
        let target = degree + steps;
        let octave_shift = target.div_euclid(n);
        let target_degree = target.rem_euclid(n) as usize;
        let tonic_pitch = start as i32 - self.offset_from_tonic(start) as i32;
        let pc_offset = self.mode.intervals()[target_degree] as i32;
        let result = tonic_pitch + octave_shift * 12 + pc_offset;
        u8::try_from(result).ok().filter(|&p| p <= 127)
    }

    /// Snap a pitch to the nearest member, preferring the lower one on ties.
    pub fn snap(&self, pitch: u8) -> u8 {
        if self.contains(pitch) {
            return pitch;
        }
        for offset in 1u8..=6 {
            if pitch >= offset && self.contains(pitch - offset) {
                return pitch - offset;
            }
            if pitch as u16 + offset as u16 <= 127 && self.contains(pitch + offset) {
                return pitch + offset;
            }
        }
        pitch
    }

    /// Position of a member pitch counted in scale steps from the tonic of
    /// octave -1 (MIDI 0-11). Non-members return `None`.
    pub fn absolute_degree(&self, pitch: u8) -> Option<i32> {
        let degree = self.degree_of(pitch)? as i32;
        let octave = (pitch as i32 - self.tonic as i32).div_euclid(12);
        Some(octave * self.len() as i32 + degree)
    }

    /// Inverse of `absolute_degree`. `None` outside the MIDI range.
    pub fn pitch_at(&self, absolute_degree: i32) -> Option<u8> {
        let n = self.len() as i32;
        let octave = absolute_degree.div_euclid(n);
        let degree = absolute_degree.rem_euclid(n) as usize;
        let pitch = self.tonic as i32 + octave * 12 + self.mode.intervals()[degree] as i32;
        u8::try_from(pitch).ok().filter(|&p| p <= 127)
    }

    fn offset_from_tonic(&self, pitch: u8) -> u8 {
        (pitch % 12 + 12 - self.tonic) % 12
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_spellings() {
        assert_eq!(Key::parse("C").unwrap(), Key::new(0, Mode::Major));
        assert_eq!(Key::parse("Am").unwrap(), Key::new(9, Mode::NaturalMinor));
        assert_eq!(Key::parse("F#m").unwrap(), Key::new(6, Mode::NaturalMinor));
        assert_eq!(Key::parse("C_dorian").unwrap(), Key::new(0, Mode::Dorian));
        assert_eq!(Key::parse("D dorian").unwrap(), Key::new(2, Mode::Dorian));
        assert_eq!(
            Key::parse("A harmonic minor").unwrap(),
            Key::new(9, Mode::HarmonicMinor)
        );
        assert_eq!(
            Key::parse("E_pentatonic").unwrap(),
            Key::new(4, Mode::MajorPentatonic)
        );
    }

    #[test]
    fn test_invalid_keys_rejected() {
        for bad in ["", "H", "C_bebop", "Xm", "C whole tone"] {
            assert!(
                matches!(Key::parse(bad), Err(GenError::InvalidKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_c_major_scale() {
        let scale = Key::parse("C").unwrap().scale();
        assert_eq!(scale.pitch_classes(), &[0, 2, 4, 5, 7, 9, 11]);
        assert!(scale.contains(60));
        assert!(!scale.contains(61));
        assert_eq!(scale.degree_of(67), Some(4));
        assert_eq!(scale.degree_of(66), None);
    }

    #[test]
    fn test_step_wraps_octaves() {
        let scale = Key::parse("C").unwrap().scale();
        assert_eq!(scale.step(71, 1), Some(72)); // B4 → C5
        assert_eq!(scale.step(60, -1), Some(59)); // C4 → B3
        assert_eq!(scale.step(60, 7), Some(72));
        assert_eq!(scale.step(64, -2), Some(60));

        let pent = Key::parse("C_pentatonic").unwrap().scale();
        assert_eq!(pent.step(69, 1), Some(72)); // A4 → C5 skips B
    }

    #[test]
    fn test_absolute_degree_round_trip() {
        let scale = Key::parse("D dorian").unwrap().scale();
        let d4 = 62;
        let idx = scale.absolute_degree(d4).unwrap();
        assert_eq!(scale.pitch_at(idx), Some(d4));
        assert_eq!(scale.pitch_at(idx + 1), Some(64));
        assert_eq!(scale.pitch_at(idx - 1), Some(60));
        assert_eq!(scale.pitch_at(idx + 7), Some(74));
        // C4 sits below the D tonic, so it belongs to the previous octave.
        assert_eq!(scale.absolute_degree(60), Some(idx - 1));
        assert_eq!(scale.absolute_degree(61), None);
    }

    #[test]
    fn test_snap_prefers_lower() {
        let scale = Key::parse("D dorian").unwrap().scale();
        assert_eq!(scale.snap(62), 62);
        assert_eq!(scale.snap(63), 62);
        assert_eq!(scale.snap(66), 65);
    }

    #[test]
    fn test_pentatonic_parent() {
        assert_eq!(Mode::MajorPentatonic.heptatonic_parent(), Mode::Major);
        assert_eq!(Mode::MinorPentatonic.heptatonic_parent(), Mode::NaturalMinor);
        assert!(Mode::Dorian.is_minor());
        assert!(!Mode::Mixolydian.is_minor());
    }
}
