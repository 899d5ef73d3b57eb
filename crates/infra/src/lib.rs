//! Infrastructure layer: event store, command dispatch, numbering, settings
//! and the document service that ties them to the stock ledger.

pub mod command_dispatcher;
pub mod error;
pub mod event_store;
pub mod masterdata;
pub mod numbering;
pub mod orchestrator;
pub mod service;
pub mod settings;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Loaded};
pub use error::ServiceError;
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use masterdata::{DocumentUsage, MasterDataRegistry};
pub use numbering::{InMemoryNumberSequence, NumberSequence};
pub use orchestrator::TransferView;
pub use service::{CreateRequest, DocumentService, STREAM_TYPE, SaveRequest};
pub use settings::Settings;
