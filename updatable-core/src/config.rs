//! Configuration for derived updatables.
//!
//! Derived components (computed, flattened, patchable) share one knob set.
//! The defaults reproduce the canonical behavior: retry stale results forever
//! and spawn onto whichever Tokio runtime is current.

use tokio::runtime::Handle;

/// Settings applied to a derived updatable with `with_config`.
#[derive(Debug, Clone, Default)]
pub struct ComputeConfig {
    /// How many consecutive stale results to discard before accepting one.
    ///
    /// `None` retries until the source holds still long enough for a
    /// computation to finish. A source that updates faster than one
    /// computation cycle can starve waiters in that mode.
    pub stale_retry_limit: Option<usize>,

    /// Runtime used when a computation starts on a thread without one.
    pub runtime: Option<Handle>,
}

impl ComputeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a result after `limit` consecutive stale discards.
    #[must_use]
    pub fn with_stale_retry_limit(mut self, limit: usize) -> Self {
        self.stale_retry_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Check whether `retries` stale discards exhaust the configured limit.
    pub(crate) fn retries_exhausted(&self, retries: usize) -> bool {
        self.stale_retry_limit.is_some_and(|limit| retries >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_never_exhausts() {
        let config = ComputeConfig::default();
        assert!(!config.retries_exhausted(0));
        assert!(!config.retries_exhausted(usize::MAX));
    }

    #[test]
    fn limit_exhausts_at_threshold() {
        let config = ComputeConfig::new().with_stale_retry_limit(2);
        assert!(!config.retries_exhausted(1));
        assert!(config.retries_exhausted(2));
        assert!(config.retries_exhausted(3));
    }
}
