//! Value-less heartbeat updatables.

use std::fmt::Debug;

use super::{Awaiter, Downgrade, Generation, Updatable, UpdatableId, Variable, WeakUpdatable};

/// A value-less heartbeat.
///
/// Works exactly like a [`Variable`] of `()`: each call to [`Updates::update`]
/// produces a new generation and wakes everyone waiting for one. Useful as a
/// coordination source for computations that re-read external state.
#[derive(Clone)]
pub struct Updates {
    signal: Variable<()>,
}

impl Updates {
    pub fn new() -> Self {
        Self {
            signal: Variable::new(()),
        }
    }

    /// Emit a new generation and return it.
    ///
    /// If a concurrent call already landed a newer generation, that one is
    /// returned instead.
    pub fn update(&self) -> Generation {
        self.signal
            .write(|_| {})
            .unwrap_or_else(|| self.signal.generation())
    }
}

impl Default for Updates {
    fn default() -> Self {
        Self::new()
    }
}

impl Updatable for Updates {
    type Value = ();

    fn id(&self) -> UpdatableId {
        self.signal.id()
    }

    fn generation(&self) -> Generation {
        self.signal.generation()
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<()>) {
        self.signal.notify(after, awaiter)
    }
}

impl Downgrade for Updates {
    fn downgrade(&self) -> WeakUpdatable<()> {
        self.signal.downgrade()
    }
}

impl Debug for Updates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updates")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .finish()
    }
}
