//! Tracking disciplines and the per-line detail records they imply.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-model stock-tracking discipline. Copied onto a line when the line is
/// created and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingType {
    /// Quantity only.
    None,
    /// Batch-coded.
    Lot,
    /// Unit-unique.
    Serial,
}

impl TrackingType {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackingType::None => "None",
            TrackingType::Lot => "Lot",
            TrackingType::Serial => "Serial",
        }
    }
}

impl core::fmt::Display for TrackingType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untracked quantity taken from (or put into) one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QtyDetail {
    pub location_code: String,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDetail {
    pub location_code: String,
    pub lot_code: String,
    pub qty: i64,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDetail {
    pub location_code: String,
    pub serial_no: String,
}

/// Concrete detail records of a line, shaped by its tracking type.
///
/// - `None`: at most one `{ qty }` record.
/// - `Lot`: one record per lot code (unique within the line).
/// - `Serial`: one record per selected serial (unique within the line).
///
/// The fulfilled quantity of a line is always derived from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tracking_type", content = "records")]
pub enum LineDetails {
    None(Option<QtyDetail>),
    Lot(Vec<LotDetail>),
    Serial(Vec<SerialDetail>),
}

impl LineDetails {
    pub fn empty(tracking: TrackingType) -> Self {
        match tracking {
            TrackingType::None => LineDetails::None(None),
            TrackingType::Lot => LineDetails::Lot(Vec::new()),
            TrackingType::Serial => LineDetails::Serial(Vec::new()),
        }
    }

    pub fn tracking_type(&self) -> TrackingType {
        match self {
            LineDetails::None(_) => TrackingType::None,
            LineDetails::Lot(_) => TrackingType::Lot,
            LineDetails::Serial(_) => TrackingType::Serial,
        }
    }

    /// `qty_picked` / `qty_received`: sum of quantities, or number of serials.
    pub fn fulfilled_qty(&self) -> i64 {
        match self {
            LineDetails::None(detail) => detail.as_ref().map_or(0, |d| d.qty),
            LineDetails::Lot(lots) => lots.iter().map(|l| l.qty).sum(),
            LineDetails::Serial(serials) => serials.len() as i64,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LineDetails::None(detail) => detail.is_none(),
            LineDetails::Lot(lots) => lots.is_empty(),
            LineDetails::Serial(serials) => serials.is_empty(),
        }
    }

    /// Distinct locations referenced by the records, in first-seen order.
    pub fn locations(&self) -> Vec<&str> {
        let all: Vec<&str> = match self {
            LineDetails::None(detail) => detail.iter().map(|d| d.location_code.as_str()).collect(),
            LineDetails::Lot(lots) => lots.iter().map(|l| l.location_code.as_str()).collect(),
            LineDetails::Serial(serials) => {
                serials.iter().map(|s| s.location_code.as_str()).collect()
            }
        };
        let mut out: Vec<&str> = Vec::with_capacity(all.len());
        for loc in all {
            if !out.contains(&loc) {
                out.push(loc);
            }
        }
        out
    }

    /// Same records with every location replaced by `location_code`
    /// (used when a picked set is received at a destination).
    pub fn relocated(&self, location_code: &str) -> Self {
        let mut out = self.clone();
        match &mut out {
            LineDetails::None(detail) => {
                if let Some(d) = detail {
                    d.location_code = location_code.to_string();
                }
            }
            LineDetails::Lot(lots) => lots
                .iter_mut()
                .for_each(|l| l.location_code = location_code.to_string()),
            LineDetails::Serial(serials) => serials
                .iter_mut()
                .for_each(|s| s.location_code = location_code.to_string()),
        }
        out
    }
}
