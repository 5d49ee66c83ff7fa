// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the entity cache.
//!
//! Misuse is reported synchronously through [`CacheError`]. Validation
//! failures are never errors; they accumulate on the entity aspect instead
//! (see [`crate::ValidationError`]).
use thiserror::Error;

/// Coarse classification of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: bad key construction, unknown names, bad configuration.
    InvalidArgument,
    /// Illegal operation for the current state of the cache or entity.
    InvalidOperation,
    /// Internal invariant violated; the current operation must be abandoned.
    Consistency,
}

/// Errors emitted by the entity cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Malformed argument (unknown type, unknown property, wrong key arity, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Illegal transition or misuse (duplicate key, read-only navigation, ...).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Internal invariant violated (cache state corruption).
    #[error("internal invariant violated: {0}")]
    Consistency(String),
}

impl CacheError {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::Consistency(_) => ErrorKind::Consistency,
        }
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub(crate) fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }
}
