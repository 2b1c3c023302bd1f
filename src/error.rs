//! Crate-wide error type.
//!
//! Every public entry point returns [`MarlinResult`]. Variants follow the
//! failure classes of the library: configuration, resource, internal
//! consistency and persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarlinError {
    /// Bad tiling scheme, shape, leading dimension or transpose combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested path exists in the API but not for this shape or host.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Page mapping, protection change or allocation failed.
    #[error("resource error: {0}")]
    Resource(String),
    /// A generator or container invariant was broken.
    #[error("internal consistency error: {0}")]
    Internal(String),
    /// Generated instruction bytes failed verification.
    #[error("integrity check failed at byte {offset}: {reason}")]
    Integrity { offset: usize, reason: String },
    /// A persisted program does not describe the requested operand.
    #[error("domain error: {0}")]
    Domain(String),
    #[error("offset out of range: requested {requested}, limit {limit}")]
    OutOfRange { requested: usize, limit: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MarlinError {
    /// Fatal errors signal exhausted OS resources or a generator bug; callers
    /// must not continue with the affected operand.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Resource(_) | Self::Internal(_) | Self::Integrity { .. }
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

pub type MarlinResult<T> = Result<T, MarlinError>;
