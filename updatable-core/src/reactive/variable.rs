//! Variable Implementation
//!
//! A Variable is the mutable root of every derivation chain. It holds the
//! current value, the generation that value was written at, and the
//! callbacks waiting for something newer.
//!
//! # Write Protocol
//!
//! `assign`, `mutate` and `assign_to` all follow the same steps:
//!
//! 1. Allocate a fresh [`Generation`] for the write.
//! 2. Take the lock and compare it with the current generation.
//! 3. If it does not exceed the current one, a concurrent writer that
//!    allocated later has already landed. The write is dropped.
//! 4. Otherwise store the value, detach every waiter, release the lock and
//!    invoke the detached waiters with the new update.
//!
//! The rule is last-generation-wins, not last-writer-wins: concurrent
//! writers never reorder history, but a slow writer can lose to a faster one.
//!
//! # Thread Safety
//!
//! State lives behind a `parking_lot::Mutex`. Callbacks are never invoked
//! with the lock held, so a callback may read or write the same variable.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use super::waiters::WaiterQueue;
use super::{Awaiter, Downgrade, Generation, Update, Updatable, UpdatableId, WeakUpdatable};

/// A mutable source of truth.
///
/// # Example
///
/// ```rust,ignore
/// let count = Variable::new(0);
/// count.assign(5);
/// assert_eq!(count.value().await?, 5);
/// ```
pub struct Variable<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<VariableState<T>>,
}

struct VariableState<T> {
    id: UpdatableId,
    cell: Mutex<Cell<T>>,
}

struct Cell<T> {
    generation: Generation,
    value: T,
    waiters: WaiterQueue<T>,
}

impl<T> Variable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a variable holding `initial` at a fresh generation.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(VariableState {
                id: UpdatableId::allocate(),
                cell: Mutex::new(Cell {
                    generation: Generation::next(),
                    value: initial,
                    waiters: WaiterQueue::new(),
                }),
            }),
        }
    }

    /// Get a copy of the current value.
    pub fn get(&self) -> T {
        self.inner.cell.lock().value.clone()
    }

    /// Snapshot of the current update.
    pub fn current(&self) -> Update<T> {
        let cell = self.inner.cell.lock();
        Update::new(cell.generation, cell.value.clone())
    }

    /// Replace the value. Returns whether the write was accepted.
    pub fn assign(&self, value: T) -> bool {
        self.write(|current| *current = value).is_some()
    }

    /// Modify the value in place. Returns whether the write was accepted.
    ///
    /// `f` runs with the variable's lock held and must not access this
    /// variable.
    pub fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        self.write(f).is_some()
    }

    /// Replace one part of the value, selected by `field`.
    ///
    /// ```rust,ignore
    /// profile.assign_to("ada".to_string(), |p| &mut p.name);
    /// ```
    pub fn assign_to<V, F>(&self, value: V, field: F) -> bool
    where
        F: FnOnce(&mut T) -> &mut V,
    {
        self.write(|current| *field(current) = value).is_some()
    }

    /// Apply a write. Returns the accepted generation, or `None` if a newer
    /// write already landed.
    pub(crate) fn write<F>(&self, f: F) -> Option<Generation>
    where
        F: FnOnce(&mut T),
    {
        let generation = Generation::next();
        let (update, ready) = {
            let mut cell = self.inner.cell.lock();
            if generation <= cell.generation {
                tracing::trace!(
                    id = %self.inner.id,
                    dropped = %generation,
                    current = %cell.generation,
                    "variable write lost the generation race"
                );
                return None;
            }
            f(&mut cell.value);
            cell.generation = generation;
            let update = Update::new(generation, cell.value.clone());
            (update, cell.waiters.take_satisfied(generation))
        };
        ready.deliver(update);
        Some(generation)
    }

    /// Number of callbacks still waiting on this variable. Futures that were
    /// dropped before resolving are not counted.
    pub fn waiter_count(&self) -> usize {
        self.inner.cell.lock().waiters.len()
    }
}

impl<T> Updatable for VariableState<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> UpdatableId {
        self.id
    }

    fn generation(&self) -> Generation {
        self.cell.lock().generation
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<T>) {
        let update = {
            let mut cell = self.cell.lock();
            if cell.generation <= after {
                cell.waiters.push(after, awaiter);
                return;
            }
            Update::new(cell.generation, cell.value.clone())
        };
        awaiter.resolve(update);
    }
}

impl<T> Updatable for Variable<T>
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
}

impl<T> Downgrade for Variable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn downgrade(&self) -> WeakUpdatable<T> {
        WeakUpdatable::from_arc(&self.inner)
    }
}

impl<T> Clone for Variable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Variable<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.inner.cell.lock();
        f.debug_struct("Variable")
            .field("id", &self.inner.id)
            .field("generation", &cell.generation)
            .field("value", &cell.value)
            .field("waiters", &cell.waiters.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
