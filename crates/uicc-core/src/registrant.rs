// ── Condition registrations ──
//
// A `Registration` watches a snapshot channel for one edge-triggered
// condition ("records loaded", "IMSI ready", ...). Each time the
// condition is (re)established its generation counter moves, and
// `next()` yields the snapshot once per generation. A registration made
// while the condition already holds fires immediately.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Extracts the generation of a condition, or `None` while it does not hold.
pub type ConditionFn<T> = fn(&T) -> Option<u64>;

pub struct Registration<T> {
    receiver: watch::Receiver<Arc<T>>,
    condition: ConditionFn<T>,
    seen: u64,
}

impl<T> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("seen", &self.seen)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Registration<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<T>>, condition: ConditionFn<T>) -> Self {
        Self {
            receiver,
            condition,
            seen: 0,
        }
    }

    /// The snapshot if the condition holds at a generation not yet delivered.
    pub fn try_next(&mut self) -> Option<Arc<T>> {
        let snapshot = self.receiver.borrow_and_update().clone();
        self.accept(snapshot)
    }

    /// Wait for the condition to hold at a new generation.
    /// Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        loop {
            if let Some(snapshot) = self.try_next() {
                return Some(snapshot);
            }
            self.receiver.changed().await.ok()?;
        }
    }

    fn accept(&mut self, snapshot: Arc<T>) -> Option<Arc<T>> {
        let generation = (self.condition)(&snapshot)?;
        if generation > self.seen {
            self.seen = generation;
            Some(snapshot)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct State {
        ready: bool,
        generation: u64,
    }

    fn ready(s: &State) -> Option<u64> {
        s.ready.then_some(s.generation)
    }

    #[tokio::test]
    async fn replays_when_already_true() {
        let (tx, rx) = watch::channel(Arc::new(State {
            ready: true,
            generation: 1,
        }));
        let mut reg = Registration::new(rx, ready);
        assert!(reg.next().await.is_some());
        assert!(reg.try_next().is_none());
        drop(tx);
        assert!(reg.next().await.is_none());
    }

    #[tokio::test]
    async fn fires_once_per_generation() {
        let (tx, rx) = watch::channel(Arc::new(State::default()));
        let mut reg = Registration::new(rx, ready);
        assert!(reg.try_next().is_none());

        tx.send_replace(Arc::new(State {
            ready: true,
            generation: 1,
        }));
        assert_eq!(reg.next().await.unwrap().generation, 1);

        // Reset without a new generation: nothing to deliver.
        tx.send_replace(Arc::new(State {
            ready: false,
            generation: 1,
        }));
        assert!(reg.try_next().is_none());

        tx.send_replace(Arc::new(State {
            ready: true,
            generation: 2,
        }));
        assert_eq!(reg.next().await.unwrap().generation, 2);
    }
}
