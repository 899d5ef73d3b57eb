//! Document events and their distribution.
//!
//! Documents emit typed events when a change is accepted. After the document
//! is stored, infra wraps each event in an [`EventEnvelope`] and publishes it
//! on an [`EventBus`] for downstream consumers (read models, notifications).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
