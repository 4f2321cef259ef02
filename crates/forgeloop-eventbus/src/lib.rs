//! In-process publish/subscribe event bus (spec.md §4.1).
//!
//! Every workflow, sandbox, scheduler, and pipeline component in this crate
//! speaks to the rest of the system only by publishing [`Event`]s here and
//! subscribing with a predicate — nothing holds a direct reference to
//! another component's internals.

mod bus;
mod subscription;

pub use bus::{BusMetrics, EventBus, DEFAULT_HISTORY_CAPACITY, DEFAULT_QUEUE_CAPACITY};
pub use forgeloop_schemas::Event;
pub use subscription::{Predicate, Subscription, SubscriptionId};
