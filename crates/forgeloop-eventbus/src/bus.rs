use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use forgeloop_schemas::Event;
use parking_lot::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::subscription::{Predicate, SubscriberState, Subscription, SubscriptionId};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Snapshot of the bus's counters, per spec.md §4.1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetrics {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub active_subscriptions: usize,
}

pub(crate) struct BusInner {
    subscribers: RwLock<Vec<Arc<SubscriberState>>>,
    history: RwLock<VecDeque<Event>>,
    history_capacity: usize,
    queue_capacity: usize,
    published: AtomicU64,
}

impl BusInner {
    pub(crate) fn remove_subscriber(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write();
        if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
            let removed = subscribers.remove(pos);
            removed.close();
        }
    }
}

/// An in-process publish/subscribe bus.
///
/// Every matching subscriber gets its own bounded queue (default
/// [`DEFAULT_QUEUE_CAPACITY`]); a slow subscriber drops its own oldest
/// undelivered events instead of slowing down publishers or other
/// subscribers. Published events are also appended to a shared ring-buffer
/// history (default [`DEFAULT_HISTORY_CAPACITY`]) so a new subscriber can
/// call [`EventBus::history`] to catch up on the recent past.
///
/// Cloning an `EventBus` is cheap and shares the same underlying state
/// (mirrors the teacher's `ChannelEventEmitter`, but with per-subscriber
/// bounding and replay instead of a single broadcast channel).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_QUEUE_CAPACITY, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacities(queue_capacity: usize, history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                history: RwLock::new(VecDeque::with_capacity(history_capacity.min(256))),
                history_capacity,
                queue_capacity,
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event. Delivered synchronously to every currently
    /// subscribed predicate that matches; never blocks on a slow consumer.
    pub fn publish(&self, event: Event) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        trace!(event_type = %event.event_type, source = %event.source, "publishing event");

        {
            let mut history = self.inner.history.write();
            if history.len() >= self.inner.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let subscribers = self.inner.subscribers.read();
        for subscriber in subscribers.iter() {
            if (subscriber.predicate)(&event) {
                subscriber.push(event.clone());
            }
        }
    }

    /// Register a new subscription. Only events matching `predicate` at
    /// publish time are enqueued for it.
    pub fn subscribe(&self, predicate: Predicate) -> Subscription {
        self.subscribe_with_capacity(predicate, self.inner.queue_capacity)
    }

    pub fn subscribe_with_capacity(&self, predicate: Predicate, capacity: usize) -> Subscription {
        let id = Uuid::now_v7();
        let state = Arc::new(SubscriberState::new(id, predicate, capacity));
        self.inner.subscribers.write().push(state.clone());
        Subscription {
            state,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Idempotent: unsubscribing twice, or unsubscribing after the
    /// `Subscription` was already dropped, is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.inner.remove_subscriber(subscription.id());
    }

    /// Up to `limit` most recent events (oldest first) matching `filter`.
    pub fn history(&self, filter: impl Fn(&Event) -> bool, limit: usize) -> Vec<Event> {
        self.inner
            .history
            .read()
            .iter()
            .filter(|e| filter(e))
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn metrics(&self) -> BusMetrics {
        let subscribers = self.inner.subscribers.read();
        let (delivered, dropped) = subscribers.iter().fold((0u64, 0u64), |(d, o), s| {
            (
                d + s.delivered_count.load(Ordering::Relaxed),
                o + s.overflow_count.load(Ordering::Relaxed),
            )
        });
        BusMetrics {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered,
            dropped,
            active_subscriptions: subscribers.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_schemas::Event;
    use futures::StreamExt;
    use serde_json::json;

    fn event(event_type: &str) -> Event {
        Event::new(event_type, "test", Uuid::now_v7(), json!({}))
    }

    #[tokio::test]
    async fn subscriber_receives_matching_events_only() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Box::new(|e| e.event_type == "workflow.started"));

        bus.publish(event("workflow.started"));
        bus.publish(event("sandbox.created"));

        let received = sub.next().await.unwrap();
        assert_eq!(received.event_type, "workflow.started");

        // No second matching event; queue is empty, subscription still open.
        assert_eq!(sub.pending_len(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::new();
        let sub = bus.subscribe_with_capacity(Box::new(|_| true), 4);

        for _ in 0..1000 {
            bus.publish(event("tick"));
        }

        assert_eq!(sub.overflow_count(), 996);
        assert_eq!(sub.pending_len(), 4);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Box::new(|_| true));
        bus.unsubscribe(&sub);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn history_replays_recent_matching_events_in_order() {
        let bus = EventBus::new();
        bus.publish(event("a"));
        bus.publish(event("b"));
        bus.publish(event("c"));

        let replayed = bus.history(|_| true, 2);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].event_type, "b");
        assert_eq!(replayed[1].event_type, "c");
    }

    #[tokio::test]
    async fn history_respects_ring_buffer_capacity() {
        let bus = EventBus::with_capacities(DEFAULT_QUEUE_CAPACITY, 3);
        for i in 0..10 {
            bus.publish(event(&format!("e{i}")));
        }
        let all = bus.history(|_| true, 100);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].event_type, "e7");
        assert_eq!(all[2].event_type, "e9");
    }

    #[tokio::test]
    async fn metrics_reflect_publish_delivery_and_overflow() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_with_capacity(Box::new(|_| true), 2);

        bus.publish(event("a"));
        bus.publish(event("b"));
        bus.publish(event("c"));

        let _ = sub.next().await;

        let metrics = bus.metrics();
        assert_eq!(metrics.published, 3);
        assert_eq!(metrics.delivered, 1);
        assert_eq!(metrics.dropped, 1);
        assert_eq!(metrics.active_subscriptions, 1);
    }
}
