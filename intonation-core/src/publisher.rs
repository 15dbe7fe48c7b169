//! # Publisher
//!
//! Observer registry that fans engine output out to subscribers.
//!
//! Observers are called synchronously from the processing cycle. They must
//! return quickly and never block: a slow observer delays every following
//! cycle. Hosts that need heavy or cross-thread work should use
//! [`Publisher::subscribe_channel`] and drain the receiver elsewhere.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::segmentation::NoteEvent;
use crate::AnalysisFrame;

/// Messages delivered to observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Full per-cycle analysis.
    Frame(Arc<AnalysisFrame>),
    /// A note ended and was appended to the note log.
    NoteClosed(NoteEvent),
    /// History and note log were emptied.
    HistoryCleared,
}

/// Proof of a subscription. Consumed by [`Publisher::unsubscribe`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping the handle makes the subscription impossible to cancel"]
pub struct SubscriptionHandle(u64);

type Callback = Box<dyn FnMut(&EngineEvent) + Send>;

enum Observer {
    Callback(Callback),
    Channel(Sender<EngineEvent>),
}

#[derive(Default)]
pub struct Publisher {
    next_id: u64,
    observers: Vec<(u64, Observer)>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked for every event.
    ///
    /// The callback runs on the engine's thread inside the processing cycle
    /// and must not block.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.register(Observer::Callback(Box::new(callback)))
    }

    /// Registers a bounded queue. Events are dropped while the queue is full;
    /// the subscription ends by itself once the receiver is dropped.
    pub fn subscribe_channel(&mut self, capacity: usize) -> (SubscriptionHandle, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (self.register(Observer::Channel(tx)), rx)
    }

    /// Removes a subscription. Returns `false` if it had already ended.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(id, _)| *id != handle.0);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Delivers `event` to every observer.
    ///
    /// A panicking callback is logged and skipped; the remaining observers
    /// still receive the event.
    ///
    /// # Returns
    /// * Number of observers that failed
    pub fn publish(&mut self, event: &EngineEvent) -> usize {
        let mut failures = 0;
        self.observers.retain_mut(|(id, observer)| match observer {
            Observer::Callback(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    log::warn!("Observer {id} panicked; continuing with remaining observers");
                    failures += 1;
                }
                true
            }
            Observer::Channel(tx) => match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::debug!("Observer {id} queue full; event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::debug!("Observer {id} receiver dropped; removing subscription");
                    false
                }
            },
        });
        failures
    }

    fn register(&mut self, observer: Observer) -> SubscriptionHandle {
        self.next_id += 1;
        self.observers.push((self.next_id, observer));
        SubscriptionHandle(self.next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(&EngineEvent) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &EngineEvent| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn delivers_to_every_observer() {
        let mut publisher = Publisher::new();
        let (a, callback_a) = counter();
        let (b, callback_b) = counter();
        let _ha = publisher.subscribe(callback_a);
        let _hb = publisher.subscribe(callback_b);

        assert_eq!(publisher.publish(&EngineEvent::HistoryCleared), 0);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_observer_does_not_stop_others() {
        let mut publisher = Publisher::new();
        let _bad = publisher.subscribe(|_| panic!("observer failure"));
        let (count, callback) = counter();
        let _good = publisher.subscribe(callback);

        assert_eq!(publisher.publish(&EngineEvent::HistoryCleared), 1);
        assert_eq!(publisher.publish(&EngineEvent::HistoryCleared), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.len(), 2);
    }

    #[test]
    fn unsubscribe_consumes_handle() {
        let mut publisher = Publisher::new();
        let (count, callback) = counter();
        let handle = publisher.subscribe(callback);
        assert!(publisher.unsubscribe(handle));
        publisher.publish(&EngineEvent::HistoryCleared);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(publisher.is_empty());
    }

    #[test]
    fn channel_subscription_drops_when_full_and_prunes_when_closed() {
        let mut publisher = Publisher::new();
        let (_handle, rx) = publisher.subscribe_channel(2);
        for _ in 0..5 {
            publisher.publish(&EngineEvent::HistoryCleared);
        }
        assert_eq!(rx.try_iter().count(), 2);

        drop(rx);
        publisher.publish(&EngineEvent::HistoryCleared);
        assert!(publisher.is_empty());
    }
}
