//! Contract with the stock ledger collaborator.
//!
//! The ledger owns on-hand/allocated quantities. This crate only reads them,
//! except for the single commit request a document sends when it completes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-hand position of one model at one location.
///
/// Invariant: `available_qty == onhand_qty - allocated_qty` and never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnhandByLocation {
    pub wh_code: String,
    pub loc_code: String,
    pub model_code: String,
    pub onhand_qty: i64,
    pub allocated_qty: i64,
    pub available_qty: i64,
}

impl OnhandByLocation {
    pub fn new(
        wh_code: impl Into<String>,
        loc_code: impl Into<String>,
        model_code: impl Into<String>,
        onhand_qty: i64,
        allocated_qty: i64,
    ) -> Self {
        Self {
            wh_code: wh_code.into(),
            loc_code: loc_code.into(),
            model_code: model_code.into(),
            onhand_qty,
            allocated_qty,
            available_qty: onhand_qty - allocated_qty,
        }
    }

    pub fn matches(&self, wh_code: &str, loc_code: &str, model_code: &str) -> bool {
        self.wh_code == wh_code && self.loc_code == loc_code && self.model_code == model_code
    }
}

/// On-hand of one lot at a (model, location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRecord {
    pub lot_code: String,
    pub onhand_qty: i64,
    pub expiry_date: Option<NaiveDate>,
    pub receipt_date: Option<NaiveDate>,
}

/// One serial unit on hand at a (model, location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRecord {
    pub serial_no: String,
    pub receipt_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    /// Stock arrives (receipt completion).
    In,
    /// Stock leaves (issue completion).
    Out,
}

/// What a movement touches below the (model, location) level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementUnit {
    Untracked,
    Lot {
        lot_code: String,
        expiry_date: Option<NaiveDate>,
    },
    Serial {
        serial_no: String,
    },
}

/// One line-detail worth of stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub line_no: u32,
    pub direction: MovementDirection,
    pub wh_code: String,
    pub loc_code: String,
    pub model_code: String,
    pub unit: MovementUnit,
    pub qty: i64,
}

impl StockMovement {
    /// The same movement in the opposite direction.
    pub fn reversed(&self) -> Self {
        let mut out = self.clone();
        out.direction = match self.direction {
            MovementDirection::In => MovementDirection::Out,
            MovementDirection::Out => MovementDirection::In,
        };
        out
    }
}

/// Whole-document commit: applied completely or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub doc_no: String,
    pub occurred_on: NaiveDate,
    pub movements: Vec<StockMovement>,
}

impl CommitRequest {
    /// Inverse request used to undo an applied commit.
    pub fn compensation(&self) -> Self {
        Self {
            doc_no: self.doc_no.clone(),
            occurred_on: self.occurred_on,
            movements: self.movements.iter().rev().map(StockMovement::reversed).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub doc_no: String,
    pub movements_applied: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger refused the request (insufficient stock, duplicate serial…).
    #[error("ledger rejected commit: {0}")]
    CommitRejected(String),

    /// The ledger could not be reached or is busy.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Read side of the ledger.
pub trait StockLedgerView: Send + Sync {
    /// All on-hand records of a warehouse.
    fn onhand(&self, wh_code: &str) -> Result<Vec<OnhandByLocation>, LedgerError>;

    fn lots(&self, wh_code: &str, loc_code: &str, model_code: &str)
    -> Result<Vec<LotRecord>, LedgerError>;

    fn serials(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
    ) -> Result<Vec<SerialRecord>, LedgerError>;

    fn onhand_at(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
    ) -> Result<Option<OnhandByLocation>, LedgerError> {
        Ok(self
            .onhand(wh_code)?
            .into_iter()
            .find(|r| r.matches(wh_code, loc_code, model_code)))
    }

    /// Available quantity of a model summed over every location of a warehouse.
    fn available_in_warehouse(&self, wh_code: &str, model_code: &str) -> Result<i64, LedgerError> {
        Ok(self
            .onhand(wh_code)?
            .iter()
            .filter(|r| r.model_code == model_code)
            .map(|r| r.available_qty)
            .sum())
    }
}

/// Ledger with the commit entry point.
pub trait StockLedger: StockLedgerView {
    fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, LedgerError>;
}

impl<L> StockLedgerView for std::sync::Arc<L>
where
    L: StockLedgerView + ?Sized,
{
    fn onhand(&self, wh_code: &str) -> Result<Vec<OnhandByLocation>, LedgerError> {
        (**self).onhand(wh_code)
    }

    fn lots(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
    ) -> Result<Vec<LotRecord>, LedgerError> {
        (**self).lots(wh_code, loc_code, model_code)
    }

    fn serials(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
    ) -> Result<Vec<SerialRecord>, LedgerError> {
        (**self).serials(wh_code, loc_code, model_code)
    }
}

impl<L> StockLedger for std::sync::Arc<L>
where
    L: StockLedger + ?Sized,
{
    fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, LedgerError> {
        (**self).commit(request)
    }
}
