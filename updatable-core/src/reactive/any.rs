//! Type-erased updatables.

use std::fmt::Debug;
use std::sync::Arc;

use super::{Awaiter, Downgrade, Generation, Updatable, UpdatableId, WeakUpdatable};

/// An updatable with its concrete type erased.
///
/// Holds the wrapped instance's operations as closures, so heterogeneous
/// sources with the same value type can be stored and consumed together.
/// Cloning shares the wrapped instance.
pub struct AnyUpdatable<T> {
    id: UpdatableId,
    generation: Arc<dyn Fn() -> Generation + Send + Sync>,
    notify: Arc<dyn Fn(Generation, Awaiter<T>) + Send + Sync>,
    is_final: Arc<dyn Fn() -> bool + Send + Sync>,
    downgrade: Arc<dyn Fn() -> WeakUpdatable<T> + Send + Sync>,
}

impl<T> AnyUpdatable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<U>(source: U) -> Self
    where
        U: Downgrade<Value = T>,
    {
        let id = source.id();
        let source = Arc::new(source);
        let for_generation = Arc::clone(&source);
        let for_notify = Arc::clone(&source);
        let for_final = Arc::clone(&source);
        Self {
            id,
            generation: Arc::new(move || for_generation.generation()),
            notify: Arc::new(move |after, awaiter| for_notify.notify(after, awaiter)),
            is_final: Arc::new(move || for_final.is_final()),
            downgrade: Arc::new(move || source.downgrade()),
        }
    }
}

impl<T> Clone for AnyUpdatable<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            generation: Arc::clone(&self.generation),
            notify: Arc::clone(&self.notify),
            is_final: Arc::clone(&self.is_final),
            downgrade: Arc::clone(&self.downgrade),
        }
    }
}

impl<T> Updatable for AnyUpdatable<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> UpdatableId {
        self.id
    }

    fn generation(&self) -> Generation {
        (self.generation)()
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<T>) {
        (self.notify)(after, awaiter)
    }

    fn is_final(&self) -> bool {
        (self.is_final)()
    }
}

impl<T> Downgrade for AnyUpdatable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn downgrade(&self) -> WeakUpdatable<T> {
        (self.downgrade)()
    }
}

impl<T> Debug for AnyUpdatable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyUpdatable")
            .field("id", &self.id)
            .field("generation", &self.generation())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
