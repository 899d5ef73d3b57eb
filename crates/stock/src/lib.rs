//! Stock side of warehouse documents.
//!
//! Tracking types and line detail records, the contract with the external
//! stock ledger, and the allocation engine that turns user input into
//! details bounded by what is actually on hand. No IO happens here apart from
//! calls through the [`StockLedgerView`]/[`StockLedger`] traits.

pub mod allocation;
pub mod in_memory;
pub mod ledger;
pub mod tracking;

pub use allocation::{
    AllocationEngine, AllocationInput, AllocationOutcome, CapacityWarning, LocationScope,
    LocationStock,
};
pub use in_memory::InMemoryStockLedger;
pub use ledger::{
    CommitReceipt, CommitRequest, LedgerError, LotRecord, MovementDirection, MovementUnit,
    OnhandByLocation, SerialRecord, StockLedger, StockLedgerView, StockMovement,
};
pub use tracking::{LineDetails, LotDetail, QtyDetail, SerialDetail, TrackingType};
