//! Error taxonomy for compilation and decompilation.
//!
//! Two tiers: structural errors (I/O, top-level JSON, broken SMF chunks)
//! abort the run; data-level errors (bad literals, missing named resources)
//! are logged as warnings by the expander and the offending element is
//! skipped, so a partially valid document still produces usable output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("malformed SMF: {0}")]
    MalformedSmf(String),

    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    #[error("{kind} '{name}' not found")]
    MissingResource { kind: &'static str, name: String },

    #[error("unknown condition type: {0}")]
    UnknownCondition(String),

    #[error("unknown or unexpected event type or format in element: {0}")]
    UnknownDirective(String),

    #[error("event field '{field}' has the wrong type in element: {element}")]
    Payload { field: String, element: String },

    #[error("no valid MIDI events found")]
    NoTracks,
}

impl Error {
    pub(crate) fn missing(kind: &'static str, name: &str) -> Self {
        Error::MissingResource {
            kind,
            name: name.to_string(),
        }
    }
}
