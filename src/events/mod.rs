//! Event Bus: a typed pub/sub channel for lifecycle and progress events,
//! with an optional durable, replayable backing store.

mod bus;
mod persistent;
mod store;
mod types;

pub use bus::{EventBus, EventBusError, EventPublisher};
pub use persistent::PersistentEventBus;
pub use store::{EventQuery, EventStoreError, EventStoreResult, SqliteEventStore};
pub use types::{by_domain, by_domains, by_type, by_types, Event, FilterPredicate, Handler};
