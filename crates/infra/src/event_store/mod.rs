//! Append-only event store boundary.
//!
//! Documents are stored as event streams keyed by document number and
//! rehydrated on load.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
