//! FlattenedVariable Implementation
//!
//! A FlattenedVariable follows a source of sources: the outer updatable
//! yields another updatable, and the flattened value is whatever that nested
//! updatable currently holds.
//!
//! # Algorithm
//!
//! The cached state remembers the outer generation it adopted and the nested
//! source it adopted from. On recompute:
//!
//! - If the outer source has not moved, wait for whichever fires first: the
//!   outer source moving, or the nested source producing something newer.
//!   The loser is dropped.
//! - If the outer source has moved, drop the old nested source and adopt the
//!   latest update of the new one directly.
//!
//! A result derived from a nested source the outer one has already switched
//! away from is never accepted: it is treated as stale and recomputed, so
//! consumers move straight from the old nested value to the new one.

use std::fmt::Debug;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::config::ComputeConfig;

use super::engine::{Derivation, Derived, Engine};
use super::{
    AnyUpdatable, Awaiter, Content, Downgrade, Generation, Update, Updatable, UpdatableExt,
    UpdatableId, WeakUpdatable,
};

/// The nested source currently adopted, and the generation last read from it.
#[derive(Clone)]
pub(crate) struct Nested<T> {
    source: AnyUpdatable<T>,
    generation: Generation,
}

/// State cached alongside a flattened update.
#[derive(Clone)]
pub(crate) struct FlattenContext<T> {
    outer_generation: Generation,
    /// `None` until a nested source is adopted, and after the outer source
    /// yields an error.
    nested: Option<Nested<T>>,
}

impl<T> Default for FlattenContext<T> {
    fn default() -> Self {
        Self {
            outer_generation: Generation::UNINITIALIZED,
            nested: None,
        }
    }
}

impl<T> FlattenContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn nested_generation(&self) -> Generation {
        self.nested
            .as_ref()
            .map_or(Generation::UNINITIALIZED, |nested| nested.source.generation())
    }
}

type Select<V, T> = Arc<dyn Fn(V) -> AnyUpdatable<T> + Send + Sync>;

struct Flatten<V, T> {
    outer: WeakUpdatable<V>,
    select: Select<V, T>,
}

impl<V, T> Derivation<T, FlattenContext<T>> for Flatten<V, T>
where
    V: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn source_generation(&self, context: &FlattenContext<T>) -> Option<Generation> {
        let outer = self.outer.upgrade()?.generation();
        Some(outer.max(context.nested_generation()))
    }

    fn is_current(&self, generation: Generation, context: &FlattenContext<T>) -> Option<bool> {
        let outer = self.outer.upgrade()?.generation();
        if outer > context.outer_generation {
            return Some(false);
        }
        let nested = context.nested_generation();
        if let Some(adopted) = &context.nested {
            if nested > adopted.generation {
                return Some(false);
            }
        }
        Some(generation >= outer.max(nested))
    }

    fn compute(
        &self,
        after: Generation,
        context: FlattenContext<T>,
    ) -> BoxFuture<'static, Derived<T, FlattenContext<T>>> {
        let outer = self.outer.clone();
        let select = Arc::clone(&self.select);
        async move {
            let Some(upstream) = outer.upgrade() else {
                return Derived::cancelled();
            };
            let moved = upstream.generation() > context.outer_generation;
            let outer_next = upstream.next_update(context.outer_generation);
            drop(upstream);

            match context.nested {
                Some(nested) if !moved => {
                    let nested_next = nested.source.next_update(nested.generation);
                    tokio::select! {
                        update = outer_next => adopt(update, after, &select).await,
                        update = nested_next => {
                            follow(update, after, context.outer_generation, nested.source)
                        }
                    }
                }
                _ => adopt(outer_next.await, after, &select).await,
            }
        }
        .boxed()
    }

    fn sources_final(&self, context: &FlattenContext<T>) -> bool {
        let outer_final = self
            .outer
            .upgrade()
            .is_some_and(|outer| outer.is_final());
        outer_final
            && context
                .nested
                .as_ref()
                .map_or(true, |nested| nested.source.is_final())
    }
}

/// The generation to publish a flattened result at.
///
/// Nested sources are independent of the outer one, so the combined
/// generation can fall at or below what was already published. Such a result
/// still carries new content and gets a fresh generation.
fn publishable(generation: Generation, after: Generation) -> Generation {
    if generation > after {
        generation
    } else {
        Generation::next()
    }
}

/// Switch to the nested source carried by a new outer update.
async fn adopt<V, T>(
    outer: Update<V>,
    after: Generation,
    select: &Select<V, T>,
) -> Derived<T, FlattenContext<T>>
where
    V: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    if outer.is_cancelled() {
        return Derived::cancelled();
    }
    let outer_generation = outer.generation();

    let (update, nested) = match outer.into_content() {
        Content::Issue(error) => (Update::issue(outer_generation, error), None),
        Content::Value(value) => {
            let source = select(value);
            tracing::trace!(nested = %source.id(), outer = %outer_generation, "adopting nested source");
            let update = source.last_update().await;
            if update.is_cancelled() {
                return Derived::cancelled();
            }
            let nested = Nested {
                generation: update.generation(),
                source,
            };
            (update, Some(nested))
        }
    };

    let generation = publishable(outer_generation.max(update.generation()), after);
    Derived {
        update: update.retagged(generation),
        context: FlattenContext {
            outer_generation,
            nested,
        },
    }
}

/// Take a newer update from the nested source already adopted.
fn follow<T>(
    update: Update<T>,
    after: Generation,
    outer_generation: Generation,
    source: AnyUpdatable<T>,
) -> Derived<T, FlattenContext<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if update.is_cancelled() {
        return Derived::cancelled();
    }
    let nested_generation = update.generation();
    Derived {
        update: update.retagged(publishable(outer_generation.max(nested_generation), after)),
        context: FlattenContext {
            outer_generation,
            nested: Some(Nested {
                source,
                generation: nested_generation,
            }),
        },
    }
}

/// An updatable whose value is read through another updatable.
///
/// # Example
///
/// ```rust,ignore
/// let primary = Variable::new("x".to_string());
/// let selected = Variable::new(primary.clone());
/// let current = FlattenedVariable::from(&selected);
/// assert_eq!(current.value().await?, "x");
/// ```
pub struct FlattenedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    engine: Arc<Engine<T, FlattenContext<T>>>,
}

impl<T> FlattenedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Follow the updatable that `outer` currently holds.
    pub fn from<S, N>(outer: &S) -> Self
    where
        S: Downgrade<Value = N>,
        N: Downgrade<Value = T> + Clone,
    {
        Self::transformed(outer, |nested: N| nested)
    }

    /// Follow the updatable that `select` picks from each outer value.
    pub fn transformed<S, N, F>(outer: &S, select: F) -> Self
    where
        S: Downgrade,
        N: Downgrade<Value = T>,
        F: Fn(S::Value) -> N + Send + Sync + 'static,
    {
        Self {
            engine: Engine::new(Flatten {
                outer: outer.downgrade(),
                select: Arc::new(move |value| AnyUpdatable::new(select(value))),
            }),
        }
    }

    #[must_use]
    pub fn with_config(self, config: ComputeConfig) -> Self {
        self.engine.configure(config);
        self
    }

    /// Identity of the nested source currently adopted, if any.
    pub fn nested_id(&self) -> Option<UpdatableId> {
        self.engine
            .context()
            .nested
            .map(|nested| nested.source.id())
    }

    /// Forget the cached value and the adopted nested source.
    ///
    /// Refused while a computation is running.
    pub fn invalidate_cache(&self) -> bool {
        self.engine.invalidate()
    }

    pub fn is_computing(&self) -> bool {
        self.engine.is_computing()
    }

    /// Whether the outer source still exists.
    ///
    /// Once the outer source is gone, `generation()` keeps returning the last
    /// cached generation; check this before trusting it.
    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }
}

impl<T> Updatable for FlattenedVariable<T>
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

impl<T> Downgrade for FlattenedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn downgrade(&self) -> WeakUpdatable<T> {
        WeakUpdatable::from_arc(&self.engine)
    }
}

impl<T> Clone for FlattenedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<T> Debug for FlattenedVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlattenedVariable")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .field("nested", &self.nested_id())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
