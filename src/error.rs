//! Error types for score loading and playback.
//!
//! Collaborator failures (XML, ZIP, host audio, preference storage) are
//! caught where they occur and downgraded to one of the kinds below before
//! they reach the transport. The transport itself only ever sees
//! [`PlaybackError`].
//!
//! ## Error Types
//! - [`ArithmeticError`] - malformed rational time (zero denominator, overflow)
//! - [`ScoreError`] - the score document could not be turned into a graph
//! - [`PlaybackError`] - what the transport surfaces to the user
//! - [`AudioError`] - raw host audio failure, only seen at the audio boundary
//! - [`StoreError`] - preference persistence failure, logged and ignored

use thiserror::Error;

/// Rational time arithmetic failed.
///
/// Fatal to timeline construction: a score that produces this cannot be
/// played and must be reported as invalid.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    /// A denominator would have become zero.
    ///
    /// ```
    /// # use scoreplay::ArithmeticError;
    /// assert_eq!(ArithmeticError::ZeroDenominator.to_string(), "zero denominator in rational time");
    /// ```
    #[error("zero denominator in rational time")]
    ZeroDenominator,

    /// The reduced numerator or denominator no longer fits in 64 bits.
    #[error("rational time overflow")]
    Overflow,
}

/// Failure while reading a score document into a [`crate::ScoreGraph`].
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("failed to read '{path}': {message}")]
    Io { path: String, message: String },

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("MXL archive error: {0}")]
    Archive(String),

    #[error("unsupported document: {0}")]
    Unsupported(String),

    #[error("invalid duration: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

/// Errors surfaced by the playback core.
///
/// Invalid transport commands are deliberately *not* errors: they are ignored
/// because user input routinely races playback completion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Malformed rational time in the score. The load is aborted.
    #[error("invalid score: {0}")]
    Arithmetic(#[from] ArithmeticError),

    /// The score has no playable entries. Play stays disabled.
    #[error("score has no playable entries")]
    EmptyScore,

    /// The host audio graph is unavailable or a decode failed. Playback
    /// commands become no-ops; the cursor still steps manually.
    #[error("audio unavailable: {0}")]
    AudioResource(String),

    /// The document could not be read at all.
    #[error("invalid score: {0}")]
    InvalidScore(String),
}

impl From<ScoreError> for PlaybackError {
    fn from(err: ScoreError) -> Self {
        match err {
            ScoreError::Arithmetic(e) => PlaybackError::Arithmetic(e),
            other => PlaybackError::InvalidScore(other.to_string()),
        }
    }
}

/// Raw failure reported by the host audio collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("audio context unavailable: {0}")]
    Unavailable(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("scheduling rejected: {0}")]
    Rejected(String),
}

impl From<AudioError> for PlaybackError {
    fn from(err: AudioError) -> Self {
        PlaybackError::AudioResource(err.to_string())
    }
}

/// Preference store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("preference file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
