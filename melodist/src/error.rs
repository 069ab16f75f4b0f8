// Error taxonomy for phrase generation.
//
// Every caller-input problem (unparsable key/chord, bad meter, inconsistent
// configuration) is detected before the first note is emitted and aborts the
// call. `NoLegalCandidate` is the one internal variant: it signals a broken
// resolver/pool invariant and is surfaced rather than retried. Recoverable
// irregularities (leap edge cases, empty model output, a refinement pass that
// finds nothing) never reach this type; they are handled by fallbacks in
// weighting.rs and selector.rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("invalid chord symbol '{0}'")]
    InvalidChord(String),

    #[error("invalid meter {numerator}/{denominator}")]
    InvalidMeter { numerator: i64, denominator: i64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no legal candidate pitch for {context}")]
    NoLegalCandidate { context: String },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenError>;

impl GenError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        GenError::Configuration(msg.into())
    }

    /// True for errors caused by caller input rather than an internal fault.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, GenError::NoLegalCandidate { .. })
    }
}
