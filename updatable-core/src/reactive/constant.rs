//! Constants
//!
//! A Constant holds one update forever. It answers any caller that has not
//! seen it yet immediately. A caller asking for something newer than the
//! constant's only generation waits until the constant is dropped, at which
//! point it receives a cancellation.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::UpdateError;

use super::waiters::WaiterQueue;
use super::{Awaiter, Downgrade, Generation, Update, Updatable, UpdatableId, WeakUpdatable};

/// An immutable, single-generation updatable.
pub struct Constant<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ConstantState<T>>,
}

struct ConstantState<T> {
    id: UpdatableId,
    update: Update<T>,
    waiters: Mutex<WaiterQueue<T>>,
}

impl<T> Constant<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self::from_update(Update::new(Generation::next(), value))
    }

    /// A constant that always reports `error`.
    pub fn failed(error: UpdateError) -> Self {
        Self::from_update(Update::issue(Generation::next(), error))
    }

    fn from_update(update: Update<T>) -> Self {
        Self {
            inner: Arc::new(ConstantState {
                id: UpdatableId::allocate(),
                update,
                waiters: Mutex::new(WaiterQueue::new()),
            }),
        }
    }

    /// The update this constant always delivers.
    pub fn update(&self) -> &Update<T> {
        &self.inner.update
    }
}

impl<T> Updatable for ConstantState<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> UpdatableId {
        self.id
    }

    fn generation(&self) -> Generation {
        self.update.generation()
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<T>) {
        if self.update.generation() > after {
            awaiter.resolve(self.update.clone());
        } else {
            // Nothing will ever satisfy this; it resolves when we are dropped.
            self.waiters.lock().push(after, awaiter);
        }
    }

    fn is_final(&self) -> bool {
        true
    }
}

impl<T> Updatable for Constant<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> UpdatableId {
        self.inner.id
    }

    fn generation(&self) -> Generation {
        self.inner.generation()
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<T>) {
        self.inner.notify(after, awaiter)
    }

    fn is_final(&self) -> bool {
        true
    }
}

impl<T> Downgrade for Constant<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn downgrade(&self) -> WeakUpdatable<T> {
        WeakUpdatable::from_arc(&self.inner)
    }
}

impl<T> Clone for Constant<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Constant<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constant")
            .field("id", &self.inner.id)
            .field("update", &self.inner.update)
            .finish()
    }
}
