//! Error Types
//!
//! Errors in this crate are content, not control flow. A failed derivation
//! produces an [`Update`](crate::reactive::Update) whose content is an
//! [`UpdateError`], and that update is cached and delivered like any value.
//! Reading it through `value()` hands the error back to the consumer.

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdateError>;

/// The error half of an update's content.
///
/// `Clone` so that a single failed computation can be fanned out to every
/// waiter that was coalesced onto it.
#[derive(Debug, Clone, Error)]
pub enum UpdateError {
    /// Nothing has been produced yet.
    #[error("uninitialized")]
    Uninitialized,

    /// The computation was cancelled or the instance producing it was dropped.
    #[error("cancelled")]
    Cancelled,

    /// A user-supplied function failed.
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// A user-supplied function failed with a plain message.
    #[error("{0}")]
    Message(String),
}

impl UpdateError {
    /// Wrap an arbitrary error.
    #[must_use]
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Check whether this error represents cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(error: std::io::Error) -> Self {
        Self::failed(error)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
