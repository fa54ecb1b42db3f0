//! Integration Tests for the Updatable System
//!
//! These tests verify that sources and derived values work together
//! correctly through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::time::timeout;

use updatable_core::reactive::{
    Awaiter, ComputedVariable, Constant, FlattenedVariable, Generation, PatchOutcome, PatchableVariable,
    Updatable, UpdatableExt, Updates, Variable,
};
use updatable_core::{ComputeConfig, UpdateError};

const WAIT: Duration = Duration::from_secs(2);

/// Test that a variable answers a caller synchronously when it already has
/// something newer.
#[test]
fn variable_notifies_synchronously() {
    let variable = Variable::new(10);
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();

    variable.notify(
        Generation::UNINITIALIZED,
        Awaiter::new(move |update| *seen_clone.lock() = Some(update)),
    );

    let update = seen.lock().take().unwrap();
    assert_eq!(*update.value().unwrap(), 10);
    assert!(update.generation() > Generation::UNINITIALIZED);
    assert_eq!(update.generation(), variable.generation());
}

/// Test that generations observed on any component never decrease.
#[tokio::test]
async fn generations_are_monotonic_across_a_chain() {
    let source = Variable::new(0);
    let derived = ComputedVariable::transformed(&source, |n: i32| async move { Ok(n + 1) });

    let mut last_source = source.generation();
    let mut last_derived = Generation::UNINITIALIZED;
    for step in 1..20 {
        source.assign(step);
        let update = derived.last_update().await;

        assert!(source.generation() > last_source);
        assert!(update.generation() > last_derived);
        assert!(derived.generation() >= update.generation());
        assert_eq!(*update.value().unwrap(), step + 1);

        last_source = source.generation();
        last_derived = update.generation();
    }
}

/// Test that every callback is invoked exactly once, with something newer
/// than it asked for or with a cancellation.
#[tokio::test]
async fn callbacks_fire_exactly_once() {
    let source = Variable::new(0);
    let calls = Arc::new(AtomicUsize::new(0));
    let requested = source.generation();

    for _ in 0..5 {
        let calls = calls.clone();
        source.notify(
            requested,
            Awaiter::new(move |update| {
                assert!(update.is_cancelled() || update.generation() > requested);
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    source.assign(1);
    source.assign(2);
    drop(source);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

/// Test that concurrent readers of a derived value share a single
/// computation and all receive the identical update.
#[tokio::test]
async fn single_flight_fan_out() {
    let source = Variable::new(5);
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let doubled = ComputedVariable::transformed(&source, move |n: i32| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(n * 2)
        }
    });

    let readers: Vec<_> = (0..32).map(|_| doubled.last_update()).collect();
    let updates = timeout(WAIT, join_all(readers)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for update in &updates {
        assert_eq!(update.generation(), updates[0].generation());
        assert_eq!(*update.value().unwrap(), 10);
    }
}

/// Test that chaining two transforms computes each exactly once.
#[tokio::test]
async fn transformed_twice() {
    let source = Variable::new(5);
    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));

    let doubled = {
        let calls = first_calls.clone();
        ComputedVariable::transformed(&source, move |n: i32| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n * 2) }
        })
    };
    let shown = {
        let calls = second_calls.clone();
        ComputedVariable::transformed(&doubled, move |n: i32| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        })
    };

    assert_eq!(shown.value().await.unwrap(), 10);
    assert_eq!(shown.value().await.unwrap(), 10);
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
}

/// Test that a result computed from a source that has since moved is never
/// delivered.
#[tokio::test]
async fn stale_results_are_suppressed() {
    let source = Variable::new(1);
    let derived = ComputedVariable::transformed(&source, |n: i32| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(n)
    });

    let pending = derived.last_update();
    tokio::time::sleep(Duration::from_millis(5)).await;
    source.assign(2);

    let update = timeout(WAIT, pending).await.unwrap();
    assert_eq!(*update.value().unwrap(), 2);
    assert_eq!(update.generation(), source.generation());
}

/// Test that destroying a derived value resolves every pending waiter.
#[tokio::test]
async fn destroy_cancels_all_waiters() {
    let source = Variable::new(1);
    let derived = ComputedVariable::transformed(&source, |n: i32| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(n)
    });

    let waiters: Vec<_> = (0..10).map(|_| derived.last_update()).collect();
    tokio::task::yield_now().await;
    assert!(derived.is_computing());
    drop(derived);

    for update in timeout(WAIT, join_all(waiters)).await.unwrap() {
        assert!(update.is_cancelled());
    }
}

/// Test that destroying a source cancels everything derived from it.
#[tokio::test]
async fn destroyed_source_cancels_downstream() {
    let source = Variable::new(1);
    let derived = ComputedVariable::transformed(&source, |n: i32| async move { Ok(n) });
    assert_eq!(derived.value().await.unwrap(), 1);

    let pending = derived.next_update(derived.generation());
    tokio::task::yield_now().await;
    drop(source);

    // The running computation observes the loss when the source drops its
    // waiters.
    assert!(timeout(WAIT, pending).await.unwrap().is_cancelled());
    assert!(derived.last_update().await.is_cancelled());
}

/// Test the patch precedence scenario: a source jump beats an earlier patch.
#[tokio::test]
async fn patch_precedence() {
    let source = Variable::new(3);
    let patched = PatchableVariable::new(&source);
    assert_eq!(patched.value().await.unwrap(), 3);

    let pending = patched.patch(|n| Some(n + 1));
    source.assign(100);

    assert_eq!(pending.await, PatchOutcome::Superseded);
    assert_eq!(patched.value().await.unwrap(), 100);
}

/// Test the flatten scenario: switching nested sources never shows a stale
/// value from the old one.
#[tokio::test]
async fn flattened_switch_skips_stale_values() {
    let a = Variable::new("x".to_string());
    let b = Variable::new("y".to_string());
    let outer = Variable::new(a.clone());
    let flat = FlattenedVariable::from(&outer);

    let mut values = flat.values();
    assert_eq!(values.next().await.unwrap().unwrap(), "x");

    let observed = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(value) = values.next().await {
            let value = value.unwrap();
            let done = value == "y";
            seen.push(value);
            if done {
                break;
            }
        }
        seen
    });
    tokio::task::yield_now().await;

    a.assign("x-late".to_string());
    outer.assign(b.clone());

    // Both writes land before the observer runs again, so the switch is
    // already visible and the old source's late value must not appear.
    let seen = timeout(WAIT, observed).await.unwrap().unwrap();
    assert_eq!(seen, vec!["y".to_string()]);
    assert_eq!(flat.nested_id(), Some(b.id()));
}

/// Test merging and combining sources.
#[tokio::test]
async fn merge_and_combine() {
    let local = Variable::new(1);
    let remote = Variable::new(2);
    let latest = ComputedVariable::merged(&local, &remote);
    let sum = ComputedVariable::combined(&local, &remote, |a: i32, b: i32| async move {
        Ok(a + b)
    });

    assert_eq!(latest.value().await.unwrap(), 2);
    assert_eq!(sum.value().await.unwrap(), 3);

    local.assign(10);
    assert_eq!(latest.value().await.unwrap(), 10);
    assert_eq!(sum.value().await.unwrap(), 12);
}

/// Test that errors travel as content and recover on the next update.
#[tokio::test]
async fn errors_flow_and_recover() {
    let source = Variable::new(0);
    let inverse = ComputedVariable::transformed(&source, |n: i32| async move {
        if n == 0 {
            Err(UpdateError::message("division by zero"))
        } else {
            Ok(100 / n)
        }
    });

    assert_eq!(
        inverse.value().await.unwrap_err().to_string(),
        "division by zero"
    );
    source.assign(4);
    assert_eq!(inverse.value().await.unwrap(), 25);

    let fixed = Constant::<i32>::failed(UpdateError::message("unreachable"));
    assert!(fixed.value().await.is_err());
}

/// Test that a heartbeat drives recomputation of external state.
#[tokio::test]
async fn heartbeat_refreshes_reader() {
    let external = Arc::new(AtomicUsize::new(1));
    let heartbeat = Updates::new();
    let reader = {
        let external = external.clone();
        ComputedVariable::transformed(&heartbeat, move |()| {
            let external = external.clone();
            async move { Ok(external.load(Ordering::SeqCst)) }
        })
    };

    let mut updates = reader.updates();
    assert_eq!(*updates.next().await.unwrap().value().unwrap(), 1);

    external.store(2, Ordering::SeqCst);
    heartbeat.update();
    assert_eq!(*updates.next().await.unwrap().value().unwrap(), 2);
}

/// Test that a bounded retry policy lets a waiter through a source that
/// never holds still.
#[tokio::test]
async fn bounded_retries_avoid_starvation() {
    let source = Variable::new(0usize);
    let slow = ComputedVariable::transformed(&source, |n: usize| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(n)
    })
    .with_config(ComputeConfig::new().with_stale_retry_limit(2));

    let writer = {
        let source = source.clone();
        tokio::spawn(async move {
            for step in 1..=200 {
                source.assign(step);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let update = timeout(WAIT, slow.last_update()).await.unwrap();
    assert!(update.value().is_ok());
    writer.abort();
}

/// Test that a derived value can be driven from a plain thread using a
/// configured runtime.
#[test]
fn configured_runtime_runs_computations() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();

    let source = Variable::new(21);
    let doubled = ComputedVariable::transformed(&source, |n: i32| async move { Ok(n * 2) })
        .with_config(ComputeConfig::new().with_runtime(runtime.handle().clone()));

    let (sender, receiver) = std::sync::mpsc::channel();
    doubled.notify(
        Generation::UNINITIALIZED,
        Awaiter::new(move |update| {
            let _ = sender.send(update);
        }),
    );

    let update = receiver.recv_timeout(WAIT).unwrap();
    assert_eq!(*update.value().unwrap(), 42);
}
