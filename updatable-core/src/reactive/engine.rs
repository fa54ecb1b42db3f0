//! Derivation Engine
//!
//! The engine is the state machine shared by every derived updatable:
//! computed, flattened and patchable variables differ only in the
//! [`Derivation`] they plug into it.
//!
//! # How It Works
//!
//! When a caller registers `notify(after, ..)`:
//!
//! 1. The engine asks the derivation whether the cached update is still
//!    current with respect to its sources.
//! 2. If it is current and newer than `after`, the caller is answered
//!    synchronously.
//! 3. Otherwise the caller joins the waiter queue. If no computation is in
//!    flight, one is spawned, seeded from the cached generation. If one is
//!    already running the caller simply waits for it (single flight).
//!
//! When the computation finishes:
//!
//! - a cancelled result, or a source that no longer exists, cancels every
//!   waiter;
//! - a result older than the cache is discarded;
//! - a result that is current is cached and fanned out to every waiter it
//!   satisfies;
//! - a result the sources have already moved past is discarded and the
//!   computation restarts.
//!
//! Any waiter still unsatisfied after that starts the next computation,
//! unless the cache is current and every source is final. Such a waiter
//! asked for something that can never exist; it stays parked until the
//! engine is dropped, and no task is kept alive on its behalf.
//!
//! # Locking
//!
//! The lock guards the cached update, its derivation context, the running
//! task and the waiter queue. Sources are never consulted while it is held:
//! the engine snapshots what it needs, releases the lock, asks the sources,
//! and re-validates against a revision counter before acting. Callbacks and
//! user code run with the lock released.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::ComputeConfig;
use crate::error::Result;

use super::patchable::PatchOutcome;
use super::waiters::{Detached, WaiterQueue};
use super::{Awaiter, Generation, NextUpdate, Update, Updatable, UpdatableId};

/// A finished computation: the update plus the context it was derived under.
pub(crate) struct Derived<T, C> {
    pub(crate) update: Update<T>,
    pub(crate) context: C,
}

impl<T, C: Default> Derived<T, C> {
    pub(crate) fn new(update: Update<T>) -> Self {
        Self {
            update,
            context: C::default(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(Update::cancelled())
    }
}

/// How a derived updatable reads its sources and computes from them.
///
/// `C` is extra state cached alongside the update. Plain computations use
/// `()`; flattening keeps the adopted nested source there.
pub(crate) trait Derivation<T, C>: Send + Sync + 'static {
    /// Newest generation of the sources, as seen through `context`.
    /// `None` once a source has been destroyed.
    fn source_generation(&self, context: &C) -> Option<Generation>;

    /// Whether an update at `generation`, derived under `context`, still
    /// reflects the sources.
    fn is_current(&self, generation: Generation, context: &C) -> Option<bool> {
        self.source_generation(context)
            .map(|source| generation >= source)
    }

    /// Produce an update newer than `after`.
    ///
    /// The returned future must not hold strong references to sources
    /// across suspension points.
    fn compute(&self, after: Generation, context: C) -> BoxFuture<'static, Derived<T, C>>;

    /// Whether no source seen through `context` can ever move again.
    fn sources_final(&self, _context: &C) -> bool {
        false
    }
}

struct EngineState<T, C> {
    cached: Update<T>,
    context: C,
    /// Bumped whenever `cached` or `context` is replaced.
    revision: u64,
    running: Option<JoinHandle<()>>,
    waiters: WaiterQueue<T>,
    stale_retries: usize,
    config: ComputeConfig,
}

/// Shared core of a derived updatable.
pub(crate) struct Engine<T, C> {
    id: UpdatableId,
    this: Weak<Self>,
    derivation: Box<dyn Derivation<T, C>>,
    state: Mutex<EngineState<T, C>>,
    runtime: Option<Handle>,
    /// Patches move the cache without any source moving.
    patchable: bool,
}

/// What the engine saw when it last released the lock.
struct Snapshot<C> {
    revision: u64,
    generation: Generation,
    uninitialized: bool,
    context: C,
}

impl<T, C> Engine<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clone + Default + Send + Sync + 'static,
{
    pub(crate) fn new<D>(derivation: D) -> Arc<Self>
    where
        D: Derivation<T, C>,
    {
        Self::build(derivation, false)
    }

    /// An engine that also accepts [`apply_patch`](Self::apply_patch).
    pub(crate) fn new_patchable<D>(derivation: D) -> Arc<Self>
    where
        D: Derivation<T, C>,
    {
        Self::build(derivation, true)
    }

    fn build<D>(derivation: D, patchable: bool) -> Arc<Self>
    where
        D: Derivation<T, C>,
    {
        Arc::new_cyclic(|this| Self {
            id: UpdatableId::allocate(),
            this: this.clone(),
            derivation: Box::new(derivation),
            state: Mutex::new(EngineState {
                cached: Update::uninitialized(),
                context: C::default(),
                revision: 0,
                running: None,
                waiters: WaiterQueue::new(),
                stale_retries: 0,
                config: ComputeConfig::default(),
            }),
            runtime: Handle::try_current().ok(),
            patchable,
        })
    }

    pub(crate) fn configure(&self, config: ComputeConfig) {
        self.state.lock().config = config;
    }

    fn snapshot(&self) -> Snapshot<C> {
        let state = self.state.lock();
        Snapshot {
            revision: state.revision,
            generation: state.cached.generation(),
            uninitialized: state.cached.is_uninitialized(),
            context: state.context.clone(),
        }
    }

    /// `Some(true)` if the cached update reflects the sources.
    fn freshness(&self, snapshot: &Snapshot<C>) -> Option<bool> {
        let current = self
            .derivation
            .is_current(snapshot.generation, &snapshot.context)?;
        Some(current && !snapshot.uninitialized)
    }

    pub(crate) fn is_available(&self) -> bool {
        let snapshot = self.snapshot();
        self.derivation
            .source_generation(&snapshot.context)
            .is_some()
    }

    pub(crate) fn is_computing(&self) -> bool {
        self.state.lock().running.is_some()
    }

    pub(crate) fn context(&self) -> C {
        self.state.lock().context.clone()
    }

    /// Drop the cached update unless a computation is in flight.
    pub(crate) fn invalidate(&self) -> bool {
        let mut state = self.state.lock();
        if state.running.is_some() {
            return false;
        }
        state.cached = Update::uninitialized();
        state.context = C::default();
        state.revision += 1;
        true
    }

    /// Start a computation for the current waiters.
    ///
    /// On failure the waiters are detached so the caller can cancel them
    /// once the lock is released.
    fn start(&self, state: &mut EngineState<T, C>) -> std::result::Result<(), Detached<T>> {
        let after = state.cached.generation();
        let context = state.context.clone();
        let this = self.this.clone();
        let task = async move {
            let Some(engine) = this.upgrade() else {
                return;
            };
            let computation = engine.derivation.compute(after, context);
            drop(engine);

            let result = computation.await;
            if let Some(engine) = this.upgrade() {
                engine.deliver(result);
            }
        };

        let runtime = Handle::try_current()
            .ok()
            .or_else(|| state.config.runtime.clone())
            .or_else(|| self.runtime.clone());
        match runtime {
            Some(runtime) => {
                tracing::trace!(id = %self.id, %after, "starting computation");
                state.running = Some(runtime.spawn(task));
                Ok(())
            }
            None => {
                tracing::error!(
                    id = %self.id,
                    "no tokio runtime available to run a computation; cancelling waiters"
                );
                Err(state.waiters.take_all())
            }
        }
    }

    /// Handle a finished computation.
    fn deliver(&self, result: Derived<T, C>) {
        let generation = result.update.generation();
        let current = if result.update.is_cancelled() {
            None
        } else {
            self.derivation.is_current(generation, &result.context)
        };
        let settled = current == Some(true) && self.derivation.sources_final(&result.context);

        let mut ready = Detached::empty();
        let mut cancelled = Detached::empty();
        let mut accepted = None;
        let mut parked = false;
        {
            let mut state = self.state.lock();
            state.running = None;

            match current {
                None => {
                    tracing::debug!(id = %self.id, "computation cancelled or source lost");
                    cancelled = state.waiters.take_all();
                }
                Some(_) if generation < state.cached.generation() => {
                    tracing::trace!(id = %self.id, %generation, "discarding result older than cache");
                }
                Some(current)
                    if current || state.config.retries_exhausted(state.stale_retries) =>
                {
                    if !current {
                        tracing::warn!(
                            id = %self.id,
                            %generation,
                            retries = state.stale_retries,
                            "accepting stale result after retry limit"
                        );
                    }
                    state.cached = result.update;
                    state.context = result.context;
                    state.revision += 1;
                    state.stale_retries = 0;
                    ready = state.waiters.take_satisfied(generation);
                    accepted = Some(state.cached.clone());
                    parked = settled;
                }
                Some(_) => {
                    state.stale_retries += 1;
                    tracing::debug!(
                        id = %self.id,
                        %generation,
                        retries = state.stale_retries,
                        "sources moved during computation; retrying"
                    );
                }
            }

            state.waiters.prune();
            if parked && !state.waiters.is_empty() {
                tracing::trace!(
                    id = %self.id,
                    waiters = state.waiters.len(),
                    "sources are final; parking waiters"
                );
            } else if !state.waiters.is_empty() {
                if let Err(failed) = self.start(&mut state) {
                    cancelled = failed;
                }
            }
        }

        if !cancelled.is_empty() {
            tracing::debug!(id = %self.id, waiters = cancelled.len(), "cancelling waiters");
        }
        cancelled.cancel();
        if let Some(update) = accepted {
            tracing::trace!(id = %self.id, %generation, waiters = ready.len(), "delivering result");
            ready.deliver(update);
        }
    }

    /// Catch up with the sources if the cache is stale and nothing is running.
    pub(crate) fn refresh(&self) {
        let snapshot = self.snapshot();
        if self.freshness(&snapshot) != Some(false) {
            return;
        }
        let failed = {
            let mut state = self.state.lock();
            if state.revision != snapshot.revision || state.running.is_some() {
                return;
            }
            self.start(&mut state).err()
        };
        if let Some(failed) = failed {
            failed.cancel();
        }
    }

    /// Apply a locally-issued mutation at `generation`.
    ///
    /// Gives the patch back when the cache first has to catch up with the
    /// sources or changed underneath it.
    pub(crate) fn apply_patch<F>(
        &self,
        generation: Generation,
        patch: F,
    ) -> std::result::Result<PatchOutcome, F>
    where
        F: FnOnce(&T) -> Result<Option<T>>,
    {
        let snapshot = self.snapshot();
        let Some(source) = self.derivation.source_generation(&snapshot.context) else {
            return Ok(PatchOutcome::Cancelled);
        };

        let (update, ready) = {
            let mut state = self.state.lock();
            if state.revision != snapshot.revision {
                return Err(patch);
            }
            let cached = state.cached.generation();
            if generation <= source || generation <= cached {
                drop(state);
                tracing::debug!(
                    id = %self.id,
                    patch = %generation,
                    %source,
                    %cached,
                    "patch superseded"
                );
                self.refresh();
                return Ok(PatchOutcome::Superseded);
            }
            if cached < source || state.cached.is_uninitialized() {
                return Err(patch);
            }

            let patched = match state.cached.value() {
                Ok(value) => patch(value),
                Err(_) => return Ok(PatchOutcome::Skipped),
            };
            let update = match patched {
                Ok(Some(value)) => Update::new(generation, value),
                Ok(None) => return Ok(PatchOutcome::Skipped),
                Err(error) if error.is_cancelled() => return Ok(PatchOutcome::Skipped),
                Err(error) => Update::issue(generation, error),
            };

            state.cached = update.clone();
            state.revision += 1;
            state.stale_retries = 0;
            (update, state.waiters.take_satisfied(generation))
        };

        ready.deliver(update);
        Ok(PatchOutcome::Applied(generation))
    }
}

impl<T, C> Updatable for Engine<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clone + Default + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> UpdatableId {
        self.id
    }

    /// Once a source is gone this is the last cached generation, which
    /// `is_available` distinguishes from a live one.
    fn generation(&self) -> Generation {
        let snapshot = self.snapshot();
        match self.derivation.source_generation(&snapshot.context) {
            Some(source) => source.max(snapshot.generation),
            None => snapshot.generation,
        }
    }

    fn notify(&self, after: Generation, awaiter: Awaiter<T>) {
        loop {
            let snapshot = self.snapshot();
            let freshness = self.freshness(&snapshot);
            let settled =
                freshness == Some(true) && self.derivation.sources_final(&snapshot.context);

            let mut state = self.state.lock();
            if state.revision != snapshot.revision {
                continue;
            }

            match freshness {
                None => {
                    drop(state);
                    awaiter.resolve(Update::cancelled());
                }
                Some(true) if state.cached.generation() > after => {
                    let update = state.cached.clone();
                    drop(state);
                    awaiter.resolve(update);
                }
                Some(_) => {
                    state.waiters.push(after, awaiter);
                    if settled {
                        tracing::trace!(id = %self.id, %after, "sources are final; parking waiter");
                    } else if state.running.is_none() {
                        if let Err(failed) = self.start(&mut state) {
                            drop(state);
                            failed.cancel();
                        }
                    }
                }
            }
            return;
        }
    }

    fn is_final(&self) -> bool {
        !self.patchable && self.derivation.sources_final(&self.context())
    }
}

impl<T, C> Drop for Engine<T, C> {
    fn drop(&mut self) {
        // Pending waiters are cancelled when the queue drops.
        if let Some(task) = self.state.get_mut().running.take() {
            task.abort();
        }
    }
}

/// Wait for whichever of two updates arrives first; the other is dropped.
pub(crate) async fn race<T>(first: NextUpdate<T>, second: NextUpdate<T>) -> Update<T> {
    tokio::select! {
        update = first => update,
        update = second => update,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{UpdatableExt, Variable, WeakUpdatable};
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    /// Mirrors a variable, pausing on a gate before each result.
    struct Gated {
        source: WeakUpdatable<i32>,
        gate: Arc<Notify>,
        runs: Arc<AtomicUsize>,
    }

    impl Derivation<i32, ()> for Gated {
        fn source_generation(&self, _: &()) -> Option<Generation> {
            Some(self.source.upgrade()?.generation())
        }

        fn compute(&self, after: Generation, _: ()) -> BoxFuture<'static, Derived<i32, ()>> {
            let source = self.source.clone();
            let gate = Arc::clone(&self.gate);
            let runs = Arc::clone(&self.runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let Some(upstream) = source.upgrade() else {
                    return Derived::cancelled();
                };
                let next = upstream.next_update(after);
                drop(upstream);
                let update = next.await;
                gate.notified().await;
                Derived::new(update)
            }
            .boxed()
        }
    }

    fn gated(source: &Variable<i32>) -> (Arc<Engine<i32, ()>>, Arc<Notify>, Arc<AtomicUsize>) {
        use crate::reactive::Downgrade;
        let gate = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(Gated {
            source: source.downgrade(),
            gate: Arc::clone(&gate),
            runs: Arc::clone(&runs),
        });
        (engine, gate, runs)
    }

    #[tokio::test]
    async fn stale_result_is_discarded_and_recomputed() {
        let source = Variable::new(1);
        let (engine, gate, runs) = gated(&source);

        let pending = engine.last_update();
        tokio::task::yield_now().await;
        assert!(engine.is_computing());

        // The source moves while the first computation is parked on the gate.
        source.assign(2);
        gate.notify_one();
        tokio::task::yield_now().await;

        gate.notify_one();
        let update = timeout(Duration::from_secs(1), pending).await.unwrap();
        assert_eq!(*update.value().unwrap(), 2);
        assert_eq!(update.generation(), source.generation());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_limit_accepts_stale_result() {
        let source = Variable::new(1);
        let (engine, gate, runs) = gated(&source);
        engine.configure(ComputeConfig::new().with_stale_retry_limit(0));

        let pending = engine.last_update();
        tokio::task::yield_now().await;
        source.assign(2);
        gate.notify_one();

        let update = timeout(Duration::from_secs(1), pending).await.unwrap();
        assert_eq!(*update.value().unwrap(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_is_refused_while_running() {
        let source = Variable::new(1);
        let (engine, gate, _) = gated(&source);

        let pending = engine.last_update();
        tokio::task::yield_now().await;
        assert!(!engine.invalidate());

        gate.notify_one();
        timeout(Duration::from_secs(1), pending).await.unwrap();
        assert!(!engine.is_computing());
        assert!(engine.invalidate());
    }

    #[tokio::test]
    async fn dropping_engine_cancels_waiters() {
        let source = Variable::new(1);
        let (engine, _gate, _) = gated(&source);

        let waiters: Vec<_> = (0..4).map(|_| engine.last_update()).collect();
        tokio::task::yield_now().await;
        drop(engine);

        for waiter in waiters {
            let update = timeout(Duration::from_secs(1), waiter).await.unwrap();
            assert!(update.is_cancelled());
        }
    }

    #[test]
    fn missing_runtime_cancels_instead_of_panicking() {
        let source = Variable::new(1);
        let (engine, _gate, _) = gated(&source);
        let cancelled = Arc::new(AtomicUsize::new(0));
        let cancelled_clone = Arc::clone(&cancelled);

        engine.notify(
            Generation::UNINITIALIZED,
            Awaiter::new(move |update| {
                if update.is_cancelled() {
                    cancelled_clone.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(!engine.is_computing());
    }

    #[tokio::test]
    async fn race_takes_first_and_drops_loser() {
        let fast = Variable::new(1);
        let slow = Variable::new(2);

        let winner = race(
            fast.next_update(Generation::UNINITIALIZED),
            slow.next_update(slow.generation()),
        )
        .await;
        assert_eq!(*winner.value().unwrap(), 1);

        // The loser's callback is abandoned with its future.
        assert_eq!(slow.waiter_count(), 0);
        slow.assign(3);
        assert_eq!(slow.waiter_count(), 0);
    }

    #[tokio::test]
    async fn lost_races_do_not_accumulate() {
        let fast = Variable::new(0);
        let slow = Variable::new(0);

        for step in 1..=50 {
            let from_fast = fast.next_update(fast.generation());
            let from_slow = slow.next_update(slow.generation());
            fast.assign(step);
            let winner = race(from_fast, from_slow).await;
            assert_eq!(*winner.value().unwrap(), step);
        }
        assert_eq!(slow.waiter_count(), 0);
    }
}
