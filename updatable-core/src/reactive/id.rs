//! Instance identity.
//!
//! Generations say how new an update is; they say nothing about which
//! instance produced it. Two variables can both sit at a low generation, and
//! a freshly adopted nested source can report a generation older than the one
//! it replaces. [`UpdatableId`] answers "is this the same instance?" instead:
//! every handle cloned from one instance shares its id, and ids are never
//! reused within a process.
//!
//! Ids show up in `Debug` output and in tracing fields as `#n`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ids start at 1 so a zeroed value never names a live instance.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one updatable instance, shared by all of its handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdatableId(u64);

impl UpdatableId {
    /// Allocated once per instance, when its shared state is created.
    pub(crate) fn allocate() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UpdatableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Constant, FlattenedVariable, Updatable, UpdatableExt, Variable};

    #[test]
    fn handles_share_an_id_and_instances_do_not() {
        let a = Variable::new(1);
        let b = Variable::new(1);
        let constant = Constant::new(1);

        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), constant.id());
        assert!(a.id().as_u64() > 0);
        assert_eq!(a.id().to_string(), format!("#{}", a.id().as_u64()));
    }

    #[tokio::test]
    async fn switching_nested_sources_changes_the_reported_id() {
        let first = Variable::new(1);
        let second = Variable::new(2);
        let outer = Variable::new(first.clone());
        let flat = FlattenedVariable::from(&outer);

        assert_eq!(flat.value().await.unwrap(), 1);
        assert_eq!(flat.nested_id(), Some(first.id()));

        outer.assign(second.clone());
        assert_eq!(flat.value().await.unwrap(), 2);
        assert_eq!(flat.nested_id(), Some(second.id()));
    }
}
