use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgewms_core::FieldViolation;
use forgewms_stock::{LineDetails, TrackingType};

/// A movement line (receipt, issue, transfer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub line_no: u32,
    pub model_code: String,
    /// Fixed when the line is created.
    pub tracking_type: TrackingType,
    pub qty_planned: i64,
    /// Chosen location in Summary-mode issues and receipts.
    pub location_code: Option<String>,
    pub details: LineDetails,
}

impl Line {
    /// `qty_picked` for issues, `qty_received` for receipts.
    pub fn fulfilled_qty(&self) -> i64 {
        self.details.fulfilled_qty()
    }

    pub(crate) fn violations(&self, idx: usize) -> Vec<FieldViolation> {
        let mut out = Vec::new();
        if self.model_code.trim().is_empty() {
            out.push(FieldViolation::new(
                format!("lines[{idx}].model_code"),
                "model is required",
            ));
        }
        if self.qty_planned <= 0 {
            out.push(FieldViolation::new(
                format!("lines[{idx}].qty_planned"),
                "planned quantity must be positive",
            ));
        }
        out
    }
}

/// Line input when saving a document.
///
/// `line_no` refers to an existing line to keep; `None` adds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub line_no: Option<u32>,
    pub model_code: String,
    pub tracking_type: TrackingType,
    pub qty_planned: i64,
    pub location_code: Option<String>,
}

impl LineDraft {
    pub fn new(model_code: impl Into<String>, tracking_type: TrackingType, qty_planned: i64) -> Self {
        Self {
            line_no: None,
            model_code: model_code.into(),
            tracking_type,
            qty_planned,
            location_code: None,
        }
    }

    pub fn at(mut self, location_code: impl Into<String>) -> Self {
        self.location_code = Some(location_code.into());
        self
    }
}

/// One (location, model) pair of an inventory count.
///
/// `system_qty` stays at 0 until the count leaves Draft; from then on it is a
/// frozen snapshot and later ledger movements do not touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub line_no: u32,
    pub location_code: String,
    pub model_code: String,
    pub system_qty: i64,
    pub snapshot_at: Option<DateTime<Utc>>,
    pub counted_qty: Option<i64>,
    pub is_recounted: bool,
}

impl CountLine {
    pub fn planned(line_no: u32, location_code: impl Into<String>, model_code: impl Into<String>) -> Self {
        Self {
            line_no,
            location_code: location_code.into(),
            model_code: model_code.into(),
            system_qty: 0,
            snapshot_at: None,
            counted_qty: None,
            is_recounted: false,
        }
    }

    /// `counted_qty - system_qty`, once a count was entered.
    pub fn variance(&self) -> Option<i64> {
        self.counted_qty.map(|counted| counted - self.system_qty)
    }
}

/// Frozen system quantity for one count line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemQtySnapshot {
    pub line_no: u32,
    pub system_qty: i64,
}
