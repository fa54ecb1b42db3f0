//! The Updatable Contract
//!
//! Every component in this crate implements [`Updatable`]: a non-blocking
//! `generation()` read plus a callback-based `notify(after, awaiter)` pull.
//! The async conveniences (`next_update`, `last_update`, `value`) and the
//! stream bridge live on [`UpdatableExt`], which is implemented for every
//! `Updatable` including trait objects.
//!
//! # Contract
//!
//! A callback registered with `notify(after, ..)` is invoked exactly once:
//!
//! - synchronously, before `notify` returns, when an update newer than
//!   `after` is already available;
//! - later, from whichever thread or task produces the first such update;
//! - or with [`Update::cancelled`] if the instance is destroyed first.
//!
//! # Ownership
//!
//! Derived components never own their sources. They keep a
//! [`WeakUpdatable`] obtained through [`Downgrade`], and treat a failed
//! upgrade as a permanent cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::future::{FutureExt, Map};
use futures_util::stream::{self, StreamExt};
use tokio::sync::oneshot;

use crate::error::Result;

use super::any::AnyUpdatable;
use super::stream::UpdateStream;
use super::{Awaiter, Generation, Update, UpdatableId};

/// A pull-based, generation-versioned observable.
pub trait Updatable: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Identity shared by every handle to the same instance.
    fn id(&self) -> UpdatableId;

    /// The newest generation this instance knows about. Never blocks.
    ///
    /// A derived instance whose source has been destroyed keeps reporting
    /// the generation it last cached; its reads resolve cancelled from then
    /// on. Use `is_available` on the derived types to tell the two apart.
    fn generation(&self) -> Generation;

    /// Call `awaiter` once with the first update newer than `after`.
    fn notify(&self, after: Generation, awaiter: Awaiter<Self::Value>);

    /// Whether this instance will never move past its current generation.
    ///
    /// Derived values use it to park waiters instead of starting a
    /// computation that could never finish.
    fn is_final(&self) -> bool {
        false
    }
}

/// Updatables that can hand out a non-owning handle to themselves.
pub trait Downgrade: Updatable {
    fn downgrade(&self) -> WeakUpdatable<Self::Value>;
}

/// Non-owning handle to an updatable.
pub struct WeakUpdatable<T> {
    inner: Weak<dyn Updatable<Value = T>>,
}

impl<T> WeakUpdatable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Downgrade a shared instance.
    pub fn from_arc<U>(instance: &Arc<U>) -> Self
    where
        U: Updatable<Value = T>,
    {
        let strong: Arc<dyn Updatable<Value = T>> = instance.clone();
        Self {
            inner: Arc::downgrade(&strong),
        }
    }

    /// Get a strong reference if the instance is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn Updatable<Value = T>>> {
        self.inner.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T> Clone for WeakUpdatable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for WeakUpdatable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakUpdatable")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Future resolving to the first update newer than a generation.
///
/// Resolves to [`Update::cancelled`] if the callback is dropped without
/// being invoked.
#[must_use = "futures do nothing unless polled"]
pub struct NextUpdate<T> {
    receiver: oneshot::Receiver<Update<T>>,
}

impl<T> Future for NextUpdate<T> {
    type Output = Update<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Update::cancelled()))
    }
}

impl<T> std::fmt::Debug for NextUpdate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextUpdate").finish_non_exhaustive()
    }
}

/// Future resolving to the latest value or error.
pub type NextValue<T> = Map<NextUpdate<T>, fn(Update<T>) -> Result<T>>;

/// Stream of values or errors, ending on cancellation.
pub type ValueStream<U> =
    stream::Map<UpdateStream<U>, fn(Update<<U as Updatable>::Value>) -> Result<<U as Updatable>::Value>>;

/// Async conveniences built on [`Updatable::notify`].
pub trait UpdatableExt: Updatable {
    /// Wait for the first update newer than `after`.
    ///
    /// The callback is registered immediately, not on first poll.
    fn next_update(&self, after: Generation) -> NextUpdate<Self::Value> {
        let (sender, receiver) = oneshot::channel();
        self.notify(after, Awaiter::channel(sender));
        NextUpdate { receiver }
    }

    /// Wait for the latest update.
    fn last_update(&self) -> NextUpdate<Self::Value> {
        self.next_update(Generation::UNINITIALIZED)
    }

    /// Wait for the latest value, or the error it carries.
    fn value(&self) -> NextValue<Self::Value> {
        self.last_update()
            .map(Update::into_result as fn(Update<Self::Value>) -> Result<Self::Value>)
    }

    /// Stream every update this handle observes.
    fn updates(&self) -> UpdateStream<Self>
    where
        Self: Clone + Sized,
    {
        UpdateStream::new(self.clone())
    }

    /// Stream every value this handle observes.
    fn values(&self) -> ValueStream<Self>
    where
        Self: Clone + Sized,
    {
        self.updates()
            .map(Update::into_result as fn(Update<Self::Value>) -> Result<Self::Value>)
    }

    /// Erase the concrete type.
    fn erase(&self) -> AnyUpdatable<Self::Value>
    where
        Self: Downgrade + Clone + Sized,
    {
        AnyUpdatable::new(self.clone())
    }
}

impl<U> UpdatableExt for U where U: Updatable + ?Sized {}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
