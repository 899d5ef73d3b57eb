//! `forgewms-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no ledger, storage or
//! transport concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult, FieldViolation};
pub use id::{ActorId, DocumentNo, DocumentPrefix};
