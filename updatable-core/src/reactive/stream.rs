//! Stream Bridge
//!
//! Turns the pull contract into a [`Stream`] so an updatable can be consumed
//! with `while let Some(update) = stream.next().await`.
//!
//! The stream remembers the generation of the last update it yielded and asks
//! for something newer each time it is polled. Intermediate updates that
//! happen between polls are skipped; the stream always yields the newest one.
//! It ends only when it receives a cancellation, never on a normal value or
//! error.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;

use super::{Generation, NextUpdate, Update, Updatable, UpdatableExt};

/// Stream of updates observed from an updatable.
#[must_use = "streams do nothing unless polled"]
pub struct UpdateStream<U: Updatable> {
    source: U,
    last_seen: Generation,
    pending: Option<NextUpdate<U::Value>>,
    finished: bool,
}

impl<U: Updatable> UpdateStream<U> {
    pub fn new(source: U) -> Self {
        Self {
            source,
            last_seen: Generation::UNINITIALIZED,
            pending: None,
            finished: false,
        }
    }

    /// Generation of the last update yielded.
    pub fn last_seen(&self) -> Generation {
        self.last_seen
    }
}

// The source is never pinned; only the oneshot-backed `NextUpdate` is polled.
impl<U: Updatable> Unpin for UpdateStream<U> {}

impl<U: Updatable> Stream for UpdateStream<U> {
    type Item = Update<U::Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let source = &this.source;
        let last_seen = this.last_seen;
        let pending = this
            .pending
            .get_or_insert_with(|| source.next_update(last_seen));

        match Pin::new(pending).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(update) => {
                this.pending = None;
                if update.is_cancelled() {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                this.last_seen = update.generation();
                Poll::Ready(Some(update))
            }
        }
    }
}

impl<U> std::fmt::Debug for UpdateStream<U>
where
    U: Updatable,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStream")
            .field("source", &self.source.id())
            .field("last_seen", &self.last_seen)
            .field("finished", &self.finished)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpdateError;
    use crate::reactive::{ComputedVariable, Variable};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn yields_current_then_new_values() {
        let variable = Variable::new(1);
        let mut values = variable.values();

        assert_eq!(values.next().await.unwrap().unwrap(), 1);

        variable.assign(2);
        assert_eq!(values.next().await.unwrap().unwrap(), 2);

        let waiter = tokio::spawn(async move { values.next().await });
        tokio::task::yield_now().await;
        variable.assign(3);
        let next = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(next.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn skips_intermediate_updates() {
        let variable = Variable::new(0);
        let mut updates = variable.updates();
        updates.next().await.unwrap();

        variable.assign(1);
        variable.assign(2);
        let latest = updates.next().await.unwrap();
        assert_eq!(*latest.value().unwrap(), 2);
        assert_eq!(updates.last_seen(), variable.generation());
    }

    #[tokio::test]
    async fn errors_do_not_end_the_stream() {
        let source = Variable::new(1);
        let checked = ComputedVariable::transformed(&source, |value: i32| async move {
            if value < 0 {
                Err(UpdateError::message("negative"))
            } else {
                Ok(value)
            }
        });
        let mut values = checked.values();
        assert_eq!(values.next().await.unwrap().unwrap(), 1);

        source.assign(-1);
        assert!(values.next().await.unwrap().is_err());

        source.assign(4);
        assert_eq!(values.next().await.unwrap().unwrap(), 4);
    }

    #[tokio::test]
    async fn ends_when_source_is_destroyed() {
        let source = Variable::new(1);
        let computed = ComputedVariable::transformed(&source, |value: i32| async move { Ok(value) });
        let mut updates = computed.updates();
        assert!(updates.next().await.is_some());

        let next = tokio::spawn(async move { updates.next().await });
        tokio::task::yield_now().await;
        drop(source);
        let ended = timeout(Duration::from_secs(1), next).await.unwrap().unwrap();
        assert!(ended.is_none());
    }
}
