// Chord symbols, chord tones and the scale that goes with each chord.
//
// A chord symbol is a root (letter plus optional accidental) followed by a
// suffix from a fixed table; anything else is `InvalidChord`. `Chord::tones`
// gives the chord's pitch-class set and `scale_for_chord` picks the scale the
// candidate pool draws from while that chord sounds:
//
// - dominant sevenths (and ninths) always get Mixolydian on their root;
// - a chord whose tones all sit in the key scale uses the key scale;
// - any other chord gets a mode matching its quality on its own root.
//
// The chord tones are always unioned into the result, so a chord scale can
// never be empty.

use crate::error::{GenError, Result};
use crate::mode::{Key, Mode, Scale};
use crate::pitch::{PITCH_CLASS_NAMES, split_pitch_class};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of pitch classes stored as a 12-bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PitchClassSet(u16);

impl PitchClassSet {
    pub const CHROMATIC: PitchClassSet = PitchClassSet(0x0fff);

    pub fn from_mask(mask: u16) -> Self {
        PitchClassSet(mask & 0x0fff)
    }

    pub fn from_pitch_classes(pcs: impl IntoIterator<Item = u8>) -> Self {
        PitchClassSet(pcs.into_iter().fold(0, |m, pc| m | (1 << (pc % 12))))
    }

    pub fn mask(self) -> u16 {
        self.0
    }

    /// True if the pitch class of `pitch` is a member.
    pub fn contains(self, pitch: u8) -> bool {
        self.0 & (1 << (pitch % 12)) != 0
    }

    pub fn union(self, other: PitchClassSet) -> PitchClassSet {
        PitchClassSet(self.0 | other.0)
    }

    pub fn is_subset_of(self, other: PitchClassSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in ascending pitch-class order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0u8..12).filter(move |&pc| self.0 & (1 << pc) != 0)
    }
}

impl From<&Scale> for PitchClassSet {
    fn from(scale: &Scale) -> Self {
        PitchClassSet::from_mask(scale.mask())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Sus2,
    Sus4,
}

impl Quality {
    /// Semitone offsets of the triad (or suspended triad) from the root.
    pub fn triad(self) -> [u8; 3] {
        match self {
            Quality::Major => [0, 4, 7],
            Quality::Minor => [0, 3, 7],
            Quality::Diminished => [0, 3, 6],
            Quality::Augmented => [0, 4, 8],
            Quality::Sus2 => [0, 2, 7],
            Quality::Sus4 => [0, 5, 7],
        }
    }
}

/// Notes added on top of the triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extension {
    Sixth,
    /// Minor seventh (the "7" in C7, Cm7, Cm7b5).
    Seventh,
    MajorSeventh,
    DiminishedSeventh,
    Ninth,
}

impl Extension {
    pub fn semitones(self) -> u8 {
        match self {
            Extension::Sixth => 9,
            Extension::Seventh => 10,
            Extension::MajorSeventh => 11,
            Extension::DiminishedSeventh => 9,
            Extension::Ninth => 14,
        }
    }
}

/// Suffix table: symbol suffix → quality and extensions.
const SUFFIXES: &[(&str, Quality, &[Extension])] = &[
    ("", Quality::Major, &[]),
    ("m", Quality::Minor, &[]),
    ("min", Quality::Minor, &[]),
    ("-", Quality::Minor, &[]),
    ("dim", Quality::Diminished, &[]),
    ("°", Quality::Diminished, &[]),
    ("aug", Quality::Augmented, &[]),
    ("+", Quality::Augmented, &[]),
    ("sus2", Quality::Sus2, &[]),
    ("sus4", Quality::Sus4, &[]),
    ("sus", Quality::Sus4, &[]),
    ("7", Quality::Major, &[Extension::Seventh]),
    ("maj7", Quality::Major, &[Extension::MajorSeventh]),
    ("M7", Quality::Major, &[Extension::MajorSeventh]),
    ("m7", Quality::Minor, &[Extension::Seventh]),
    ("min7", Quality::Minor, &[Extension::Seventh]),
    ("m7b5", Quality::Diminished, &[Extension::Seventh]),
    ("ø", Quality::Diminished, &[Extension::Seventh]),
    ("dim7", Quality::Diminished, &[Extension::DiminishedSeventh]),
    ("6", Quality::Major, &[Extension::Sixth]),
    ("m6", Quality::Minor, &[Extension::Sixth]),
    ("9", Quality::Major, &[Extension::Seventh, Extension::Ninth]),
    ("m9", Quality::Minor, &[Extension::Seventh, Extension::Ninth]),
    ("maj9", Quality::Major, &[Extension::MajorSeventh, Extension::Ninth]),
    ("add9", Quality::Major, &[Extension::Ninth]),
    ("madd9", Quality::Minor, &[Extension::Ninth]),
    ("mMaj7", Quality::Minor, &[Extension::MajorSeventh]),
    ("7sus4", Quality::Sus4, &[Extension::Seventh]),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Chord {
    pub root: u8,
    pub quality: Quality,
    pub extensions: Vec<Extension>,
}

impl Chord {
    pub fn triad(root: u8, quality: Quality) -> Self {
        Chord {
            root: root % 12,
            quality,
            extensions: Vec::new(),
        }
    }

    /// Parse a chord symbol such as `"C"`, `"F#m"`, `"Bb7"` or `"Dm7b5"`.
    pub fn parse(symbol: &str) -> Result<Chord> {
        let trimmed = symbol.trim();
        let (root, suffix) =
            split_pitch_class(trimmed).ok_or_else(|| GenError::InvalidChord(symbol.to_string()))?;
        let (_, quality, extensions) = SUFFIXES
            .iter()
            .find(|(s, _, _)| *s == suffix)
            .ok_or_else(|| GenError::InvalidChord(symbol.to_string()))?;
        Ok(Chord {
            root,
            quality: *quality,
            extensions: extensions.to_vec(),
        })
    }

    /// The triad built on `degree` (0-based) of the key's seven-note scale.
    pub fn diatonic(key: &Key, degree: usize) -> Chord {
        let scale = key.harmonic_scale();
        let pcs = scale.pitch_classes();
        let n = pcs.len();
        let root = pcs[degree % n];
        let third = (pcs[(degree + 2) % n] + 12 - root) % 12;
        let fifth = (pcs[(degree + 4) % n] + 12 - root) % 12;
        let quality = match (third, fifth) {
            (3, 7) => Quality::Minor,
            (3, 6) => Quality::Diminished,
            (4, 8) => Quality::Augmented,
            _ => Quality::Major,
        };
        Chord::triad(root, quality)
    }

    /// The tonic triad of `key`.
    pub fn tonic(key: &Key) -> Chord {
        Chord::diatonic(key, 0)
    }

    /// The pitch-class set sounded by this chord.
    pub fn tones(&self) -> PitchClassSet {
        let triad = self.quality.triad().into_iter();
        let ext = self.extensions.iter().map(|e| e.semitones());
        PitchClassSet::from_pitch_classes(triad.chain(ext).map(|iv| self.root + iv))
    }

    /// Major triad plus a minor seventh: the chord that wants Mixolydian.
    pub fn is_dominant_seventh(&self) -> bool {
        self.quality == Quality::Major && self.extensions.contains(&Extension::Seventh)
    }

    /// Scale degree of the root within `key`, if the root is diatonic.
    pub fn degree_in(&self, key: &Key) -> Option<usize> {
        key.harmonic_scale().degree_of(self.root)
    }

    /// Canonical symbol, using sharps and the first table spelling.
    pub fn symbol(&self) -> String {
        let suffix = SUFFIXES
            .iter()
            .find(|(_, q, ext)| *q == self.quality && *ext == self.extensions.as_slice())
            .map(|(s, _, _)| *s)
            .unwrap_or("?");
        format!("{}{}", PITCH_CLASS_NAMES[self.root as usize], suffix)
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

/// The pitch classes melodic lines may use while `chord` sounds in `key`.
pub fn scale_for_chord(key: &Key, chord: &Chord) -> PitchClassSet {
    let tones = chord.tones();
    let key_scale = PitchClassSet::from(&key.scale());
    let base = if chord.is_dominant_seventh() {
        PitchClassSet::from(&Scale::new(chord.root, Mode::Mixolydian))
    } else if tones.is_subset_of(key_scale) {
        key_scale
    } else {
        let mode = match chord.quality {
            Quality::Major => Mode::Major,
            Quality::Minor => Mode::Dorian,
            Quality::Diminished => Mode::Locrian,
            Quality::Augmented => Mode::WholeTone,
            Quality::Sus2 | Quality::Sus4 => Mode::Mixolydian,
        };
        PitchClassSet::from(&Scale::new(chord.root, mode))
    };
    base.union(tones)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcs(set: PitchClassSet) -> Vec<u8> {
        set.iter().collect()
    }

    #[test]
    fn test_parse_common_symbols() {
        let c = Chord::parse("C").unwrap();
        assert_eq!(pcs(c.tones()), vec![0, 4, 7]);

        let am = Chord::parse("Am").unwrap();
        assert_eq!(am.root, 9);
        assert_eq!(am.quality, Quality::Minor);
        assert_eq!(pcs(am.tones()), vec![0, 4, 9]);

        let g7 = Chord::parse("G7").unwrap();
        assert_eq!(pcs(g7.tones()), vec![2, 5, 7, 11]);
        assert!(g7.is_dominant_seventh());

        let half_dim = Chord::parse("Bm7b5").unwrap();
        assert_eq!(pcs(half_dim.tones()), vec![2, 5, 9, 11]);
        assert_eq!(Chord::parse("Bø").unwrap(), half_dim);

        assert_eq!(pcs(Chord::parse("Ebmaj7").unwrap().tones()), vec![2, 3, 7, 10]);
        assert_eq!(pcs(Chord::parse("Dsus").unwrap().tones()), vec![2, 7, 9]);
        assert_eq!(pcs(Chord::parse("Cadd9").unwrap().tones()), vec![0, 2, 4, 7]);
    }

    #[test]
    fn test_invalid_chords_rejected() {
        for bad in ["", "H7", "Cmaj13", "C#dim9", "7"] {
            assert!(
                matches!(Chord::parse(bad), Err(GenError::InvalidChord(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_symbol_round_trip() {
        for sym in ["C", "F#m", "G7", "Bdim", "A#maj7", "Dm7b5", "Esus4"] {
            let chord = Chord::parse(sym).unwrap();
            assert_eq!(Chord::parse(&chord.symbol()).unwrap(), chord);
        }
        assert_eq!(Chord::parse("Bb").unwrap().symbol(), "A#");
    }

    #[test]
    fn test_diatonic_triads() {
        let c = Key::parse("C").unwrap();
        let names: Vec<String> = (0..7).map(|d| Chord::diatonic(&c, d).symbol()).collect();
        assert_eq!(names, ["C", "Dm", "Em", "F", "G", "Am", "Bdim"]);

        let a = Key::parse("Am").unwrap();
        assert_eq!(Chord::tonic(&a).symbol(), "Am");
        assert_eq!(Chord::diatonic(&a, 4).symbol(), "Em");

        let harmonic = Key::parse("A harmonic minor").unwrap();
        assert_eq!(Chord::diatonic(&harmonic, 4).symbol(), "E");
        assert_eq!(Chord::diatonic(&harmonic, 2).symbol(), "Caug");

        // Pentatonic keys borrow their parent's triads.
        let pent = Key::parse("C_pentatonic").unwrap();
        assert_eq!(Chord::diatonic(&pent, 3).symbol(), "F");
    }

    #[test]
    fn test_scale_for_dominant_is_mixolydian() {
        let c = Key::parse("C").unwrap();
        let d7 = Chord::parse("D7").unwrap();
        // D mixolydian: D E F# G A B C
        assert_eq!(pcs(scale_for_chord(&c, &d7)), vec![0, 2, 4, 6, 7, 9, 11]);
    }

    #[test]
    fn test_scale_for_diatonic_chord_is_key_scale() {
        let c = Key::parse("C").unwrap();
        let am = Chord::parse("Am").unwrap();
        assert_eq!(pcs(scale_for_chord(&c, &am)), vec![0, 2, 4, 5, 7, 9, 11]);
    }

    #[test]
    fn test_scale_for_chromatic_chords() {
        let c = Key::parse("C").unwrap();
        // Bbm is not diatonic to C: Bb dorian.
        let bbm = Chord::parse("Bbm").unwrap();
        let expected = PitchClassSet::from(&Scale::new(10, Mode::Dorian));
        assert_eq!(scale_for_chord(&c, &bbm), expected);

        let aug = Chord::parse("Caug").unwrap();
        assert_eq!(pcs(scale_for_chord(&c, &aug)), vec![0, 2, 4, 6, 8, 10]);
        assert!(aug.tones().is_subset_of(scale_for_chord(&c, &aug)));
    }

    #[test]
    fn test_degree_in_key() {
        let g = Key::parse("G").unwrap();
        assert_eq!(Chord::parse("D").unwrap().degree_in(&g), Some(4));
        assert_eq!(Chord::parse("F").unwrap().degree_in(&g), None);
    }
}
