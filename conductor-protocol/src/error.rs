//! Protocol error types

use std::io;
use thiserror::Error;

/// Protocol error types
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes do not describe a known note, or a payload does not fit its command
    #[error("Malformed note: {0}")]
    MalformedNote(String),

    /// The input ended before the note was complete
    #[error("IO error while reading note: {0}")]
    Io(#[from] io::Error),

    /// The encoder could not write a value
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl ProtocolError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ProtocolError::MalformedNote(message.into())
    }

    pub(crate) fn truncated(what: &str) -> Self {
        ProtocolError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("note ended while reading {}", what),
        ))
    }

    /// Check if this error means the note could not be understood
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::MalformedNote(_))
    }

    /// Check if this error means the input was cut short
    pub fn is_truncated(&self) -> bool {
        matches!(self, ProtocolError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl From<serde_cbor::Error> for ProtocolError {
    fn from(err: serde_cbor::Error) -> Self {
        if err.is_eof() {
            ProtocolError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()))
        } else if err.is_io() {
            ProtocolError::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
        } else {
            ProtocolError::MalformedNote(err.to_string())
        }
    }
}
