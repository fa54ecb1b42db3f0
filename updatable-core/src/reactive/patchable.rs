//! PatchableVariable Implementation
//!
//! A PatchableVariable mirrors a source through a transform, like a
//! [`ComputedVariable`](super::ComputedVariable), and also accepts local
//! optimistic mutations ("patches") layered on top of the derived value.
//!
//! # Precedence
//!
//! A patch takes its [`Generation`] when it is issued. It is applied only if
//! that generation is newer than both the source and the cached value at the
//! moment it runs. A patch the source has moved past is dropped and the
//! variable catches up with the source instead.
//!
//! # Ordering
//!
//! - If the cache is behind the source, the patch waits for the derived
//!   update to land and applies against that.
//! - Patches run one at a time, in the order they first get polled.
//! - A patch function returning `None` is a check, not a write.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::FutureExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::ComputeConfig;
use crate::error::Result;

use super::computed::Transformed;
use super::engine::Engine;
use super::{Awaiter, Downgrade, Generation, Updatable, UpdatableExt, UpdatableId, WeakUpdatable};

/// What happened to a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Written at the given generation.
    Applied(Generation),
    /// The patch function declined to write, or there was no value to patch.
    Skipped,
    /// The source moved past the patch; the variable follows the source.
    Superseded,
    /// The variable or its source no longer exists.
    Cancelled,
}

impl PatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied(_))
    }
}

/// A derived value that also accepts local patches.
///
/// # Example
///
/// ```rust,ignore
/// let server = Variable::new(3);
/// let likes = PatchableVariable::new(&server);
/// likes.patch(|n| Some(n + 1)).await;
/// assert_eq!(likes.value().await?, 4);
/// ```
pub struct PatchableVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    engine: Arc<Engine<T, ()>>,
    /// Serializes patches.
    gate: Arc<AsyncMutex<()>>,
}

impl<T> PatchableVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Mirror `source` unchanged.
    pub fn new<S>(source: &S) -> Self
    where
        S: Downgrade<Value = T>,
    {
        Self::updating_from(source, |value| async move { Ok(value) })
    }

    /// Mirror `source` through `transform`.
    pub fn updating_from<S, F, Fut>(source: &S, transform: F) -> Self
    where
        S: Downgrade,
        F: Fn(S::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            engine: Engine::new_patchable(Transformed {
                source: source.downgrade(),
                transform: Arc::new(move |value| transform(value).boxed()),
            }),
            gate: Arc::new(AsyncMutex::new(())),
        }
    }

    #[must_use]
    pub fn with_config(self, config: ComputeConfig) -> Self {
        self.engine.configure(config);
        self
    }

    /// Apply `patch` to the current value.
    ///
    /// The generation is taken now; the returned future applies it. `patch`
    /// runs while the variable is locked and must not access it.
    pub fn patch<F>(&self, patch: F) -> impl Future<Output = PatchOutcome> + Send + 'static
    where
        F: FnOnce(&T) -> Option<T> + Send + 'static,
    {
        self.try_patch(move |value| Ok(patch(value)))
    }

    /// Like [`patch`](Self::patch), for fallible patch functions.
    ///
    /// An error is written as the variable's content at the patch generation,
    /// except cancellation, which skips the patch.
    pub fn try_patch<F>(&self, patch: F) -> impl Future<Output = PatchOutcome> + Send + 'static
    where
        F: FnOnce(&T) -> Result<Option<T>> + Send + 'static,
    {
        let generation = Generation::next();
        let engine = Arc::downgrade(&self.engine);
        let gate = Arc::clone(&self.gate);

        async move {
            let _turn = gate.lock_owned().await;
            let mut patch = patch;
            loop {
                let Some(strong) = engine.upgrade() else {
                    return PatchOutcome::Cancelled;
                };
                let landed = strong.last_update();
                drop(strong);
                if landed.await.is_cancelled() {
                    return PatchOutcome::Cancelled;
                }

                let Some(strong) = engine.upgrade() else {
                    return PatchOutcome::Cancelled;
                };
                match strong.apply_patch(generation, patch) {
                    Ok(outcome) => return outcome,
                    // The cache changed underneath us; wait for it again.
                    Err(returned) => patch = returned,
                }
            }
        }
    }

    pub fn is_computing(&self) -> bool {
        self.engine.is_computing()
    }

    /// Whether the source still exists. Once it is gone, `generation()`
    /// stays at the last cached generation.
    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }
}

impl<T> Updatable for PatchableVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> UpdatableId {
        self.engine.id()
    }

    fn generation(&self) -> Generation {
        self.engine.generation()
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<T>) {
        self.engine.notify(after, awaiter)
    }
}

impl<T> Downgrade for PatchableVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn downgrade(&self) -> WeakUpdatable<T> {
        WeakUpdatable::from_arc(&self.engine)
    }
}

impl<T> Clone for PatchableVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<T> Debug for PatchableVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchableVariable")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .field("computing", &self.is_computing())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
