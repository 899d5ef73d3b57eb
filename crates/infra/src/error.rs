//! Service-level error taxonomy.

use thiserror::Error;

use forgewms_core::{DomainError, FieldViolation};
use forgewms_stock::LedgerError;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;

/// Errors surfaced by [`DocumentService`](crate::service::DocumentService).
///
/// `Validation`, `InvalidFields`, `Guard`, `InvalidTransition`, `Rejected`
/// and `Conflict` leave every document untouched. `LedgerCommit` and
/// `Inconsistency` are hard failures. `Automation` means the requested
/// change is stored and only its follow-up is pending.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("validation failed: {}", join(.0))]
    InvalidFields(Vec<FieldViolation>),

    #[error("guard violation: {0}")]
    Guard(String),

    #[error("invalid transition for {kind}: {from} -> {to}")]
    InvalidTransition {
        kind: String,
        from: String,
        to: String,
    },

    /// The document is not in a state that allows the operation.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The ledger refused or could not apply the commit; the status did not change.
    #[error("ledger commit failed for {doc_no}: {source}")]
    LedgerCommit {
        doc_no: String,
        #[source]
        source: LedgerError,
    },

    /// Reading from the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A document references a linked document that does not exist.
    #[error("inconsistent document links: {0}")]
    Inconsistency(String),

    #[error("store failure: {0}")]
    Store(String),

    /// Stored, but publishing the events failed.
    #[error("event publication failed: {0}")]
    Publish(String),

    /// Stored, but follow-up automation failed; repeating the transition resumes it.
    #[error("{doc_no} was stored but follow-up automation failed: {source}")]
    Automation {
        doc_no: String,
        #[source]
        source: Box<ServiceError>,
    },
}

fn join(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ServiceError {
    /// Caller mistakes and refused business rules, as opposed to failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation(_)
                | ServiceError::InvalidFields(_)
                | ServiceError::Guard(_)
                | ServiceError::InvalidTransition { .. }
                | ServiceError::Rejected(_)
                | ServiceError::Conflict(_)
        )
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ServiceError::Validation(msg),
            DomainError::InvalidFields(v) => ServiceError::InvalidFields(v),
            DomainError::GuardViolation(msg) => ServiceError::Guard(msg),
            DomainError::InvalidTransition { kind, from, to } => {
                ServiceError::InvalidTransition { kind, from, to }
            }
            DomainError::InvariantViolation(msg) => ServiceError::Rejected(msg),
            DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::NotFound => ServiceError::NotFound("document".to_string()),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
        }
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Store(other.to_string()),
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => e.into(),
            DispatchError::Store(e) => e.into(),
            DispatchError::Deserialize(msg) => ServiceError::Store(msg),
            DispatchError::Publish(msg) => ServiceError::Publish(msg),
        }
    }
}
