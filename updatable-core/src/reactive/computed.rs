//! ComputedVariable Implementation
//!
//! A ComputedVariable derives its value from one or two sources through an
//! async function. It is lazy: nothing is computed until a consumer asks,
//! and a cached result is reused for as long as the sources have not moved.
//!
//! # Single Flight
//!
//! However many consumers ask at once, at most one computation runs. Every
//! consumer that arrives while it is running is coalesced onto it and receives
//! the identical result.
//!
//! # Variants
//!
//! - [`ComputedVariable::lazy`]: no source; computed once.
//! - [`ComputedVariable::transformed`]: one source, async transform.
//! - [`ComputedVariable::merged`]: two sources of the same type; whichever
//!   has the newer update wins.
//! - [`ComputedVariable::combined`]: two sources; recompute from both when
//!   either changes.
//!
//! # Errors
//!
//! A transform that returns an error produces an update carrying that error
//! at the attempted generation. Returning
//! [`UpdateError::Cancelled`](crate::error::UpdateError::Cancelled) produces
//! a cancellation instead, which is never cached.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::config::ComputeConfig;
use crate::error::Result;

use super::engine::{race, Derivation, Derived, Engine};
use super::{
    Awaiter, Content, Downgrade, Generation, Update, Updatable, UpdatableExt, UpdatableId,
    WeakUpdatable,
};

pub(crate) type Transform<V, T> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<T>> + Send + Sync>;

type Combine<A, B, T> = Arc<dyn Fn(A, B) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Run `transform` on the value of `update`, keeping its generation.
async fn apply<V, T>(update: Update<V>, transform: &Transform<V, T>) -> Update<T> {
    let generation = update.generation();
    match update.into_content() {
        Content::Value(value) => Update::from_result(generation, transform(value).await),
        Content::Issue(error) => Update::issue(generation, error),
    }
}

// ----------------------------------------------------------------------------
// Derivations
// ----------------------------------------------------------------------------

/// No source: one computation at a fixed generation.
struct Lazy<T> {
    generation: Generation,
    compute: Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>,
}

impl<T> Derivation<T, ()> for Lazy<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source_generation(&self, _: &()) -> Option<Generation> {
        Some(self.generation)
    }

    fn compute(&self, _after: Generation, _: ()) -> BoxFuture<'static, Derived<T, ()>> {
        let generation = self.generation;
        let compute = Arc::clone(&self.compute);
        async move { Derived::new(Update::from_result(generation, compute().await)) }.boxed()
    }

    fn sources_final(&self, _: &()) -> bool {
        true
    }
}

/// Whether a weak source is alive and final.
fn is_final_source<V>(source: &WeakUpdatable<V>) -> bool
where
    V: Clone + Send + Sync + 'static,
{
    source.upgrade().is_some_and(|source| source.is_final())
}

/// One source, async transform.
pub(crate) struct Transformed<V, T> {
    pub(crate) source: WeakUpdatable<V>,
    pub(crate) transform: Transform<V, T>,
}

impl<V, T> Derivation<T, ()> for Transformed<V, T>
where
    V: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn source_generation(&self, _: &()) -> Option<Generation> {
        Some(self.source.upgrade()?.generation())
    }

    fn compute(&self, after: Generation, _: ()) -> BoxFuture<'static, Derived<T, ()>> {
        let source = self.source.clone();
        let transform = Arc::clone(&self.transform);
        async move {
            let Some(upstream) = source.upgrade() else {
                return Derived::cancelled();
            };
            let next = upstream.next_update(after);
            drop(upstream);
            Derived::new(apply(next.await, &transform).await)
        }
        .boxed()
    }

    fn sources_final(&self, _: &()) -> bool {
        is_final_source(&self.source)
    }
}

/// Two sources of one type; the newer update wins.
struct Merged<T> {
    first: WeakUpdatable<T>,
    second: WeakUpdatable<T>,
}

impl<T> Derivation<T, ()> for Merged<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source_generation(&self, _: &()) -> Option<Generation> {
        let first = self.first.upgrade()?.generation();
        let second = self.second.upgrade()?.generation();
        Some(first.max(second))
    }

    fn compute(&self, after: Generation, _: ()) -> BoxFuture<'static, Derived<T, ()>> {
        let first = self.first.clone();
        let second = self.second.clone();
        async move {
            let (Some(first), Some(second)) = (first.upgrade(), second.upgrade()) else {
                return Derived::cancelled();
            };
            let (first_generation, second_generation) = (first.generation(), second.generation());

            let update = if first_generation > after || second_generation > after {
                // Something is already newer; take the newest without racing.
                let next = if first_generation >= second_generation {
                    first.next_update(after)
                } else {
                    second.next_update(after)
                };
                drop((first, second));
                next.await
            } else {
                let (from_first, from_second) = (first.next_update(after), second.next_update(after));
                drop((first, second));
                race(from_first, from_second).await
            };
            Derived::new(update)
        }
        .boxed()
    }

    fn sources_final(&self, _: &()) -> bool {
        is_final_source(&self.first) && is_final_source(&self.second)
    }
}

/// Two sources combined by a function.
struct Combined<A, B, T> {
    first: WeakUpdatable<A>,
    second: WeakUpdatable<B>,
    combine: Combine<A, B, T>,
}

impl<A, B, T> Derivation<T, ()> for Combined<A, B, T>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn source_generation(&self, _: &()) -> Option<Generation> {
        let first = self.first.upgrade()?.generation();
        let second = self.second.upgrade()?.generation();
        Some(first.max(second))
    }

    fn compute(&self, after: Generation, _: ()) -> BoxFuture<'static, Derived<T, ()>> {
        let first_source = self.first.clone();
        let second_source = self.second.clone();
        let combine = Arc::clone(&self.combine);
        async move {
            let (Some(first), Some(second)) = (first_source.upgrade(), second_source.upgrade())
            else {
                return Derived::cancelled();
            };

            if first.generation() <= after && second.generation() <= after {
                // Wait for whichever source moves first.
                let (from_first, from_second) = (first.next_update(after), second.next_update(after));
                drop((first, second));
                let cancelled = tokio::select! {
                    update = from_first => update.is_cancelled(),
                    update = from_second => update.is_cancelled(),
                };
                if cancelled {
                    return Derived::cancelled();
                }
            } else {
                drop((first, second));
            }

            let (Some(first), Some(second)) = (first_source.upgrade(), second_source.upgrade())
            else {
                return Derived::cancelled();
            };
            let reads = future::join(first.last_update(), second.last_update());
            drop((first, second));
            let (first, second) = reads.await;

            let generation = first.generation().max(second.generation());
            let update = match (first.into_content(), second.into_content()) {
                (Content::Value(a), Content::Value(b)) => {
                    Update::from_result(generation, combine(a, b).await)
                }
                (Content::Issue(error), _) | (_, Content::Issue(error)) => {
                    Update::issue(generation, error)
                }
            };
            Derived::new(update)
        }
        .boxed()
    }

    fn sources_final(&self, _: &()) -> bool {
        is_final_source(&self.first) && is_final_source(&self.second)
    }
}

// ----------------------------------------------------------------------------
// ComputedVariable
// ----------------------------------------------------------------------------

/// A value derived from other updatables by an async function.
///
/// # Example
///
/// ```rust,ignore
/// let count = Variable::new(5);
/// let doubled = ComputedVariable::transformed(&count, |v| async move { Ok(v * 2) });
/// assert_eq!(doubled.value().await?, 10);
/// ```
pub struct ComputedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    engine: Arc<Engine<T, ()>>,
}

impl<T> ComputedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Compute once, on first demand.
    pub fn lazy<F, Fut>(compute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            engine: Engine::new(Lazy {
                generation: Generation::next(),
                compute: Arc::new(move || compute().boxed()),
            }),
        }
    }

    /// Recompute from `source` whenever it moves.
    pub fn transformed<S, F, Fut>(source: &S, transform: F) -> Self
    where
        S: Downgrade,
        F: Fn(S::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            engine: Engine::new(Transformed {
                source: source.downgrade(),
                transform: Arc::new(move |value| transform(value).boxed()),
            }),
        }
    }

    /// Follow whichever of two sources updated most recently.
    pub fn merged<A, B>(first: &A, second: &B) -> Self
    where
        A: Downgrade<Value = T>,
        B: Downgrade<Value = T>,
    {
        Self {
            engine: Engine::new(Merged {
                first: first.downgrade(),
                second: second.downgrade(),
            }),
        }
    }

    /// Combine the latest values of two sources.
    pub fn combined<A, B, F, Fut>(first: &A, second: &B, combine: F) -> Self
    where
        A: Downgrade,
        B: Downgrade,
        F: Fn(A::Value, B::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            engine: Engine::new(Combined {
                first: first.downgrade(),
                second: second.downgrade(),
                combine: Arc::new(move |a, b| combine(a, b).boxed()),
            }),
        }
    }

    #[must_use]
    pub fn with_config(self, config: ComputeConfig) -> Self {
        self.engine.configure(config);
        self
    }

    /// Forget the cached value so the next read recomputes.
    ///
    /// Refused while a computation is running, since its result is trusted
    /// over a blind invalidation. Returns whether the cache was cleared.
    pub fn invalidate_cache(&self) -> bool {
        self.engine.invalidate()
    }

    /// Whether a computation is in flight.
    pub fn is_computing(&self) -> bool {
        self.engine.is_computing()
    }

    /// Whether every source still exists.
    ///
    /// Once this is false, `generation()` keeps returning the last cached
    /// generation and every read resolves cancelled.
    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }
}

impl<T> Updatable for ComputedVariable<T>
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

    fn is_final(&self) -> bool {
        self.engine.is_final()
    }
}

impl<T> Downgrade for ComputedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn downgrade(&self) -> WeakUpdatable<T> {
        WeakUpdatable::from_arc(&self.engine)
    }
}

impl<T> Clone for ComputedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<T> Debug for ComputedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedVariable")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .field("computing", &self.is_computing())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
