//! Waiter Queues
//!
//! Every mutable component keeps its pending callbacks in a [`WaiterQueue`]
//! behind its own lock. The queue is never drained in place: callbacks are
//! detached into a [`Detached`] batch while the lock is held, and the batch is
//! delivered after the lock is released. A callback is therefore free to call
//! back into the instance that invoked it.
//!
//! # Ordering
//!
//! Delivery is LIFO: the most recently registered waiter runs first. No
//! ordering is promised between independent observers.
//!
//! # Exactly once
//!
//! Dropping a queue or a batch that still holds callbacks resolves each of
//! them with [`Update::cancelled`]. That is how a destroyed instance resolves
//! everyone still waiting on it.
//!
//! # Abandoned waiters
//!
//! A waiter registered by [`next_update`](super::UpdatableExt::next_update)
//! is abandoned once its future is dropped, for example when it loses a race
//! between two sources. Abandoned waiters are pruned whenever a new one is
//! registered and are not counted, so a source that rarely changes does not
//! accumulate callbacks nobody will read.

use smallvec::SmallVec;
use tokio::sync::oneshot;

use super::{Generation, Update};

enum Callback<T> {
    Boxed(Box<dyn FnOnce(Update<T>) + Send + 'static>),
    Channel(oneshot::Sender<Update<T>>),
}

/// A single-shot callback awaiting an update.
pub struct Awaiter<T> {
    callback: Callback<T>,
}

impl<T> Awaiter<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Update<T>) + Send + 'static,
    {
        Self {
            callback: Callback::Boxed(Box::new(callback)),
        }
    }

    /// Deliver into a oneshot channel. Abandoned once the receiver drops.
    pub(crate) fn channel(sender: oneshot::Sender<Update<T>>) -> Self {
        Self {
            callback: Callback::Channel(sender),
        }
    }

    /// Whether nobody can observe the delivery any more.
    pub fn is_abandoned(&self) -> bool {
        match &self.callback {
            Callback::Boxed(_) => false,
            Callback::Channel(sender) => sender.is_closed(),
        }
    }

    /// Invoke the callback.
    pub fn resolve(self, update: Update<T>) {
        match self.callback {
            Callback::Boxed(callback) => callback(update),
            Callback::Channel(sender) => {
                let _ = sender.send(update);
            }
        }
    }
}

impl<T> std::fmt::Debug for Awaiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awaiter")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// A registered callback and the generation it must exceed.
struct Waiter<T> {
    after: Generation,
    awaiter: Awaiter<T>,
}

type WaiterList<T> = SmallVec<[Waiter<T>; 2]>;

/// Pending callbacks of one instance.
pub(crate) struct WaiterQueue<T> {
    waiters: WaiterList<T>,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: SmallVec::new(),
        }
    }

    /// Register a callback for the first update newer than `after`.
    pub(crate) fn push(&mut self, after: Generation, awaiter: Awaiter<T>) {
        self.prune();
        self.waiters.push(Waiter { after, awaiter });
    }

    /// Drop waiters whose futures are gone.
    pub(crate) fn prune(&mut self) {
        self.waiters.retain(|waiter| !waiter.awaiter.is_abandoned());
    }

    /// Number of waiters someone is still listening to.
    pub(crate) fn len(&self) -> usize {
        self.waiters
            .iter()
            .filter(|waiter| !waiter.awaiter.is_abandoned())
            .count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach every callback.
    pub(crate) fn take_all(&mut self) -> Detached<T> {
        Detached {
            waiters: std::mem::take(&mut self.waiters),
        }
    }

    /// Detach the callbacks an update at `generation` satisfies.
    pub(crate) fn take_satisfied(&mut self, generation: Generation) -> Detached<T> {
        if self.waiters.iter().all(|waiter| waiter.after < generation) {
            return self.take_all();
        }

        let mut satisfied = SmallVec::new();
        let mut remaining = SmallVec::new();
        for waiter in self.waiters.drain(..) {
            if waiter.after < generation {
                satisfied.push(waiter);
            } else {
                remaining.push(waiter);
            }
        }
        self.waiters = remaining;
        Detached { waiters: satisfied }
    }
}

impl<T> Drop for WaiterQueue<T> {
    fn drop(&mut self) {
        if !self.waiters.is_empty() {
            self.take_all().cancel();
        }
    }
}

/// Callbacks detached from a queue, to be invoked outside the lock.
#[must_use = "detached waiters must be delivered"]
pub(crate) struct Detached<T> {
    waiters: WaiterList<T>,
}

impl<T> Detached<T> {
    pub(crate) fn empty() -> Self {
        Self {
            waiters: SmallVec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Resolve every callback with [`Update::cancelled`].
    pub(crate) fn cancel(mut self) {
        for waiter in std::mem::take(&mut self.waiters).into_iter().rev() {
            waiter.awaiter.resolve(Update::cancelled());
        }
    }
}

impl<T: Clone> Detached<T> {
    /// Invoke every callback with the same update, newest registration first.
    pub(crate) fn deliver(mut self, update: Update<T>) {
        for waiter in std::mem::take(&mut self.waiters).into_iter().rev() {
            waiter.awaiter.resolve(update.clone());
        }
    }
}

impl<T> Drop for Detached<T> {
    fn drop(&mut self) {
        for waiter in std::mem::take(&mut self.waiters).into_iter().rev() {
            waiter.awaiter.resolve(Update::cancelled());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
