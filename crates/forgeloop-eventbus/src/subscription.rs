//! The per-subscriber queue and the `Subscription` stream handle returned by
//! [`crate::EventBus::subscribe`].

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use forgeloop_schemas::Event;
use futures::Stream;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::bus::BusInner;

pub type SubscriptionId = Uuid;
pub type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// Shared state between the bus (producer side) and a `Subscription`
/// (consumer side). The bus pushes; the subscription pops via `Stream`.
pub(crate) struct SubscriberState {
    pub(crate) id: SubscriptionId,
    pub(crate) predicate: Predicate,
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    closed: AtomicBool,
    waker: Mutex<Option<Waker>>,
    pub(crate) overflow_count: AtomicU64,
    pub(crate) delivered_count: AtomicU64,
}

impl SubscriberState {
    pub(crate) fn new(id: SubscriptionId, predicate: Predicate, capacity: usize) -> Self {
        Self {
            id,
            predicate,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            closed: AtomicBool::new(false),
            waker: Mutex::new(None),
            overflow_count: AtomicU64::new(0),
            delivered_count: AtomicU64::new(0),
        }
    }

    /// Push an event into this subscriber's queue. Returns `true` if an
    /// older, undelivered event had to be dropped to make room.
    pub(crate) fn push(&self, event: Event) -> bool {
        let mut dropped = false;
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                dropped = true;
            }
            queue.push_back(event);
        }
        if dropped {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
        dropped
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// A live subscription to the event bus.
///
/// Implements [`Stream`], so consumers typically do
/// `while let Some(event) = subscription.next().await { ... }`. The stream
/// ends (`Poll::Ready(None)`) once [`crate::EventBus::unsubscribe`] has been
/// called and the queue has drained.
pub struct Subscription {
    pub(crate) state: Arc<SubscriberState>,
    pub(crate) bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.state.id
    }

    /// Number of undelivered events dropped from this subscription's queue
    /// due to overflow.
    pub fn overflow_count(&self) -> u64 {
        self.state.overflow_count.load(Ordering::Relaxed)
    }

    /// How many events currently sit in this subscription's queue.
    pub fn pending_len(&self) -> usize {
        self.state.queue_len()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(event) = this.state.queue.lock().pop_front() {
            this.state.delivered_count.fetch_add(1, Ordering::Relaxed);
            return Poll::Ready(Some(event));
        }
        if this.state.closed.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        *this.state.waker.lock() = Some(cx.waker().clone());
        // Re-check after registering the waker to avoid a lost-wakeup race
        // with a publish that happened between the first pop and here.
        if let Some(event) = this.state.queue.lock().pop_front() {
            this.state.delivered_count.fetch_add(1, Ordering::Relaxed);
            return Poll::Ready(Some(event));
        }
        Poll::Pending
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscriber(self.state.id);
        }
    }
}
