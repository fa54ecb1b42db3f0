//! Generations
//!
//! A Generation is the logical clock of the reactive core. Every accepted
//! write, every computed result and every patch is tagged with one, and all
//! freshness decisions reduce to comparing them.
//!
//! # Allocation
//!
//! Generations come from a single process-wide atomic counter. Each call to
//! [`Generation::next`] returns a value strictly greater than every value
//! returned before it, on any thread. Because the counter is shared, the
//! generations of unrelated instances are comparable, which is what lets a
//! flattened variable combine an outer and a nested generation with `max`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counter backing [`Generation::next`]. Zero is reserved.
static GENERATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Monotonic version token.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Sentinel for "nothing observed yet". Lower than every real generation.
    pub const UNINITIALIZED: Generation = Generation(0);

    /// Allocate a fresh generation.
    pub fn next() -> Self {
        Self(GENERATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_uninitialized(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn next_is_strictly_increasing() {
        let a = Generation::next();
        let b = Generation::next();
        let c = Generation::next();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn uninitialized_is_below_everything() {
        assert!(Generation::UNINITIALIZED < Generation::next());
        assert!(Generation::UNINITIALIZED.is_uninitialized());
        assert_eq!(Generation::default(), Generation::UNINITIALIZED);
    }

    #[test]
    fn concurrent_allocation_never_duplicates() {
        let seen = Arc::new(parking_lot::Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let generation = Generation::next();
                        assert!(seen.lock().insert(generation));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(seen.lock().len(), 8_000);
    }

    #[test]
    fn serializes_as_plain_number() {
        let generation = Generation::next();
        let json = serde_json::to_string(&generation).unwrap();
        assert_eq!(json, generation.raw().to_string());
        let back: Generation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, generation);
    }
}
