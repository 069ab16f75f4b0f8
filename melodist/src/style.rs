// Style vectors: a small fixed-length description of musical style.
//
// The three dimensions are counterpoint strictness, chromatic colour and
// repetition density. The named presets are one-hot (baroque, jazz, pop) and
// can be blended linearly. A vector's per-candidate contribution is a linear
// combination of three candidate features, added in log space by the
// weighting engine.
//
// Vectors of the wrong length are a configuration error. Nothing here pads
// or truncates.

use crate::error::{GenError, Result};
use crate::pitch::interval;
use serde::{Deserialize, Serialize};

/// Length every style vector must have.
pub const STYLE_DIMENSIONS: usize = 3;

pub const PRESETS: &[(&str, [f64; STYLE_DIMENSIONS])] = &[
    ("baroque", [1.0, 0.0, 0.0]),
    ("jazz", [0.0, 1.0, 0.0]),
    ("pop", [0.0, 0.0, 1.0]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct StyleVector([f64; STYLE_DIMENSIONS]);

impl StyleVector {
    pub fn new(values: &[f64]) -> Result<Self> {
        if values.len() != STYLE_DIMENSIONS {
            return Err(GenError::config(format!(
                "style vector has {} dimensions, expected {STYLE_DIMENSIONS}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(GenError::config("style vector values must be finite"));
        }
        let mut dims = [0.0; STYLE_DIMENSIONS];
        dims.copy_from_slice(values);
        Ok(StyleVector(dims))
    }

    pub fn preset(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        PRESETS
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, dims)| StyleVector(*dims))
            .ok_or_else(|| GenError::config(format!("unknown style '{name}'")))
    }

    /// `(1 - ratio) * a + ratio * b`, with `ratio` in [0, 1].
    pub fn blend(a: &StyleVector, b: &StyleVector, ratio: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(GenError::config(format!(
                "style blend ratio {ratio} is outside [0, 1]"
            )));
        }
        let mut dims = [0.0; STYLE_DIMENSIONS];
        for (i, d) in dims.iter_mut().enumerate() {
            *d = (1.0 - ratio) * a.0[i] + ratio * b.0[i];
        }
        Ok(StyleVector(dims))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn strictness(&self) -> f64 {
        self.0[0]
    }

    pub fn chromaticism(&self) -> f64 {
        self.0[1]
    }

    pub fn repetition(&self) -> f64 {
        self.0[2]
    }

    /// Log-space offset for moving from `previous` to `candidate`.
    ///
    /// - strictness penalizes leaps and dissonant melodic intervals;
    /// - chromaticism rewards pitches outside the key and semitone motion;
    /// - repetition rewards repeating the previous pitch, or the one before.
    pub fn offset(&self, candidate: u8, previous: Option<u8>, recent: &[u8], in_key: bool) -> f64 {
        let mut strict = 0.0;
        let mut chroma = if in_key { 0.0 } else { 1.0 };
        let mut repeat = 0.0;
        if let Some(prev) = previous {
            let iv = interval::semitones(prev, candidate);
            if interval::is_leap(iv) {
                strict -= 1.0;
            }
            if iv != 0 && interval::is_dissonant(iv) {
                strict -= 0.5;
            }
            if iv.unsigned_abs() == 1 {
                chroma += 0.3;
            }
            if iv == 0 {
                repeat += 1.0;
            }
        }
        if recent.len() >= 2 && recent[recent.len() - 2] == candidate {
            repeat += 0.5;
        }
        self.strictness() * strict + self.chromaticism() * chroma + self.repetition() * repeat
    }
}

impl TryFrom<Vec<f64>> for StyleVector {
    type Error = GenError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        StyleVector::new(&values)
    }
}

impl From<StyleVector> for Vec<f64> {
    fn from(style: StyleVector) -> Self {
        style.0.to_vec()
    }
}

/// How a request names its style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleSpec {
    Named(String),
    Vector(Vec<f64>),
    Blend { a: String, b: String, ratio: f64 },
}

impl StyleSpec {
    pub fn resolve(&self) -> Result<StyleVector> {
        match self {
            StyleSpec::Named(name) => StyleVector::preset(name),
            StyleSpec::Vector(values) => StyleVector::new(values),
            StyleSpec::Blend { a, b, ratio } => {
                StyleVector::blend(&StyleVector::preset(a)?, &StyleVector::preset(b)?, *ratio)
            }
        }
    }
}
