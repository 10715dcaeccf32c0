//! Exchange error types

use conductor_protocol::{Note, ProtocolError};
use thiserror::Error;

/// Exchange error types
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// Broker connect, publish or subscribe failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport has no live connection
    #[error("Transport not connected")]
    NotConnected,

    /// A note could not be encoded or decoded
    #[error("Malformed note: {0}")]
    MalformedNote(String),

    /// Fewer replies arrived than were required
    #[error("Not enough replies: expected {expected}, collected {collected}")]
    NotEnoughReplies { expected: usize, collected: usize },

    /// A peer answered a request with an error reply
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The client has been shut down
    #[error("Exchange client closed")]
    Closed,
}

impl ExchangeError {
    /// Check if reconnecting may fix this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Connection(_) | ExchangeError::NotConnected
        )
    }

    /// Check if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::MalformedNote(_) | ExchangeError::Closed)
    }
}

impl From<ProtocolError> for ExchangeError {
    fn from(err: ProtocolError) -> Self {
        ExchangeError::MalformedNote(err.to_string())
    }
}

/// A quorum wait that ended early, with whatever did arrive
#[derive(Debug, Clone, Error)]
#[error("Not enough replies: expected {expected}, collected {}", .replies.len())]
pub struct NotEnoughReplies {
    pub expected: usize,
    pub replies: Vec<Note>,
}

impl NotEnoughReplies {
    pub fn collected(&self) -> usize {
        self.replies.len()
    }
}

impl From<NotEnoughReplies> for ExchangeError {
    fn from(err: NotEnoughReplies) -> Self {
        ExchangeError::NotEnoughReplies {
            expected: err.expected,
            collected: err.collected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(ExchangeError::Connection("reset".to_string()).is_retryable());
        assert!(ExchangeError::NotConnected.is_retryable());
        assert!(!ExchangeError::MalformedNote("bad".to_string()).is_retryable());
        assert!(!ExchangeError::NotEnoughReplies {
            expected: 3,
            collected: 2
        }
        .is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(ExchangeError::MalformedNote("bad".to_string()).is_fatal());
        assert!(ExchangeError::Closed.is_fatal());
        assert!(!ExchangeError::NotConnected.is_fatal());
        assert!(!ExchangeError::Rejected("busy".to_string()).is_fatal());
    }

    #[test]
    fn test_not_enough_replies_conversion() {
        let err = NotEnoughReplies {
            expected: 3,
            replies: Vec::new(),
        };
        assert_eq!(err.collected(), 0);
        assert_eq!(err.to_string(), "Not enough replies: expected 3, collected 0");

        match ExchangeError::from(err) {
            ExchangeError::NotEnoughReplies {
                expected,
                collected,
            } => {
                assert_eq!(expected, 3);
                assert_eq!(collected, 0);
            }
            other => panic!("unexpected {other}"),
        }
    }
}
