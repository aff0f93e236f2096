//! # Error Types
//!
//! The typed error surface of the engine. Malformed configuration (keys,
//! translator tables) fails fast at load/registration time. Runtime payloads
//! are rejected only for wholesale shape problems; anything field-level
//! degrades inside the decode path and surfaces through logging and the
//! skip counters instead.

use crate::units::Dimension;
use std::fmt;

/// All failure modes the engine can return to a caller.
///
/// `Display` and `Error` are implemented by hand: several variants carry a
/// data-source id in a field named `source`, which `thiserror` would
/// otherwise treat as an error-chain source and require to be an error type.
#[derive(Debug)]
pub enum MergeError {
    /// A canonical key string was malformed (empty segment, embedded
    /// separator, or empty input). Raised at the construction site.
    InvalidKey { key: String, reason: &'static str },

    /// A conversion was requested between unrelated dimensions.
    IncompatibleDimension { from: Dimension, to: Dimension },

    /// Arithmetic was attempted across unrelated dimensions.
    DimensionMismatch {
        op: &'static str,
        left: Dimension,
        right: Dimension,
    },

    /// A translator table failed validation at registration time.
    TranslatorConfig { source: String, detail: String },

    /// An ingest call referenced a source that was never registered.
    UnknownSource { source: String },

    /// A payload had the wrong top-level shape (e.g. a document that is not
    /// a JSON object). Field-level problems inside a well-shaped payload are
    /// skipped and counted instead.
    Payload { detail: String },

    /// A source id was registered twice.
    DuplicateSource { source: String },

    /// Engine configuration failed to load or parse.
    Config(String),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::InvalidKey { key, reason } => {
                write!(f, "invalid canonical key {key:?}: {reason}")
            }
            MergeError::IncompatibleDimension { from, to } => {
                write!(f, "cannot convert {from} to {to}")
            }
            MergeError::DimensionMismatch { op, left, right } => {
                write!(f, "cannot {op} {left} and {right}")
            }
            MergeError::TranslatorConfig { source, detail } => {
                write!(f, "translator for source {source:?}: {detail}")
            }
            MergeError::UnknownSource { source } => {
                write!(f, "unknown source {source:?}")
            }
            MergeError::Payload { detail } => {
                write!(f, "payload rejected: {detail}")
            }
            MergeError::DuplicateSource { source } => {
                write!(f, "source {source:?} is already registered")
            }
            MergeError::Config(detail) => {
                write!(f, "configuration error: {detail}")
            }
        }
    }
}

impl std::error::Error for MergeError {}

impl From<figment::Error> for MergeError {
    fn from(err: figment::Error) -> Self {
        MergeError::Config(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MergeError>;
