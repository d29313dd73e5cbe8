//! Call-related error types.

use imcall_core::UnknownMediaType;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Malformed input: unknown media type, unknown stream id.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request cannot be honoured now: wrong peer, missing capability,
    /// wrong call state, no media session.
    #[error("not available: {0}")]
    NotAvailable(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The channel closed before the request could be satisfied.
    #[error("request cancelled")]
    Cancelled,
}

impl From<UnknownMediaType> for CallError {
    fn from(err: UnknownMediaType) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
