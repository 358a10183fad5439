use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::trace;

use super::{Event, EventType};

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

type HandlerFn = dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync;

/// A subscribed callback. Clones share identity, which is what
/// [`EventBus::unsubscribe`] matches on.
#[derive(Clone)]
pub struct Handler {
    id: u64,
    func: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(move |event| Box::pin(func(event))),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// In-process publish/subscribe bus.
///
/// `publish` snapshots the handlers registered for the event's type and runs
/// them in registration order on one spawned task. Separate publishes run on
/// separate tasks with no ordering between them.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<Handler>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: EventType, handler: Handler) {
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Returns true when the handler was registered for `event_type`
    pub fn unsubscribe(&self, event_type: EventType, handler: &Handler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h.id != handler.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&event_type);
        }
        removed
    }

    pub fn unsubscribe_all(&self, event_type: EventType) {
        self.handlers.write().remove(&event_type);
    }

    #[must_use]
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers.read().get(&event_type).map_or(0, Vec::len)
    }

    /// Dispatch `event` to the current subscribers without waiting for them.
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, event: Event) {
        let event_type = event.event_type();
        let snapshot = match self.handlers.read().get(&event_type) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return,
        };

        trace!(event = %event_type, handlers = snapshot.len(), "Dispatching event");
        tokio::spawn(async move {
            for handler in snapshot {
                (handler.func)(event.clone()).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{LiveId, MockLive};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn room_event(kind: EventType) -> Event {
        let mut live = MockLive::new();
        live.expect_live_id().return_const(LiveId::from_string("room"));
        Event::room(kind, Arc::new(live))
    }

    fn recording_handler(tag: &'static str, tx: mpsc::UnboundedSender<&'static str>) -> Handler {
        Handler::new(move |_event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(tag);
            }
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(room_event(EventType::LiveStarted));
        assert_eq!(bus.subscriber_count(EventType::LiveStarted), 0);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let slow_tx = tx.clone();
        bus.subscribe(
            EventType::LiveStarted,
            Handler::new(move |_event| {
                let tx = slow_tx.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = tx.send("first");
                }
            }),
        );
        bus.subscribe(EventType::LiveStarted, recording_handler("second", tx.clone()));
        bus.subscribe(EventType::LiveEnded, recording_handler("other", tx));

        bus.publish(room_event(EventType::LiveStarted));

        assert_eq!(rx.recv().await, Some("first"));
        assert_eq!(rx.recv().await, Some("second"));
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_slow_dispatch_does_not_delay_next_publish() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicU64::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());

        bus.subscribe(
            EventType::LiveStarted,
            Handler::new({
                let gate = Arc::clone(&gate);
                move |_event| {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    let gate = Arc::clone(&gate);
                    let tx = tx.clone();
                    async move {
                        // The first dispatch hangs until released.
                        if call == 0 {
                            gate.notified().await;
                        }
                        let _ = tx.send(call);
                    }
                }
            }),
        );

        bus.publish(room_event(EventType::LiveStarted));
        bus.publish(room_event(EventType::LiveStarted));

        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("second publish waited for the first");
        assert_eq!(second, Some(1));

        gate.notify_one();
        assert_eq!(rx.recv().await, Some(0));
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_event() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe(EventType::RoomRenamed, recording_handler("early", tx.clone()));
        bus.publish(room_event(EventType::RoomRenamed));
        bus.subscribe(EventType::RoomRenamed, recording_handler("late", tx));

        assert_eq!(rx.recv().await, Some("early"));
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_by_identity() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let keep = recording_handler("keep", tx.clone());
        let drop_me = recording_handler("drop", tx);
        bus.subscribe(EventType::LiveEnded, keep.clone());
        bus.subscribe(EventType::LiveEnded, drop_me.clone());

        assert!(bus.unsubscribe(EventType::LiveEnded, &drop_me));
        assert!(!bus.unsubscribe(EventType::LiveEnded, &drop_me));
        assert!(!bus.unsubscribe(EventType::LiveStarted, &keep));

        bus.publish(room_event(EventType::LiveEnded));
        assert_eq!(rx.recv().await, Some("keep"));
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.subscribe(EventType::WatchStopped, recording_handler("a", tx.clone()));
        bus.subscribe(EventType::WatchStopped, recording_handler("b", tx));
        assert_eq!(bus.subscriber_count(EventType::WatchStopped), 2);

        bus.unsubscribe_all(EventType::WatchStopped);
        assert_eq!(bus.subscriber_count(EventType::WatchStopped), 0);
    }
}
