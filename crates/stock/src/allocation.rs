//! Allocation engine: turns user input into concrete line details.
//!
//! Quantities are never rejected for being too large. They are clamped to the
//! maximum usable value and the correction is reported as a
//! [`CapacityWarning`] next to the result.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use forgewms_core::{DomainError, DomainResult};

use crate::ledger::{LedgerError, LotRecord, SerialRecord, StockLedgerView};
use crate::tracking::{LineDetails, LotDetail, QtyDetail, SerialDetail, TrackingType};

/// Stock of one model at one location, as offered to the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStock {
    pub wh_code: String,
    pub loc_code: String,
    pub model_code: String,
    pub available_qty: i64,
    pub lots: Vec<LotRecord>,
    pub serials: Vec<SerialRecord>,
}

impl LocationStock {
    /// Read the position and, depending on `tracking`, its lots or serials.
    pub fn load<L>(
        ledger: &L,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
        tracking: TrackingType,
    ) -> Result<Self, LedgerError>
    where
        L: StockLedgerView + ?Sized,
    {
        let available_qty = ledger
            .onhand_at(wh_code, loc_code, model_code)?
            .map_or(0, |r| r.available_qty.max(0));
        let lots = match tracking {
            TrackingType::Lot => ledger.lots(wh_code, loc_code, model_code)?,
            _ => Vec::new(),
        };
        let serials = match tracking {
            TrackingType::Serial => ledger.serials(wh_code, loc_code, model_code)?,
            _ => Vec::new(),
        };
        Ok(Self {
            wh_code: wh_code.to_string(),
            loc_code: loc_code.to_string(),
            model_code: model_code.to_string(),
            available_qty,
            lots,
            serials,
        })
    }
}

/// What the user entered for one line at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationInput {
    /// Untracked quantity.
    Quantity { qty: i64 },
    /// Quantity for one lot. `expiry_date` is only used when receiving.
    ///
    /// A line holds one record per lot code; entering a lot at another
    /// location moves that record there.
    LotQuantity {
        lot_code: String,
        qty: i64,
        expiry_date: Option<NaiveDate>,
    },
    /// Select or deselect one serial.
    ToggleSerial { serial_no: String },
}

impl AllocationInput {
    fn label(&self) -> &'static str {
        match self {
            AllocationInput::Quantity { .. } => "quantity",
            AllocationInput::LotQuantity { .. } => "lot quantity",
            AllocationInput::ToggleSerial { .. } => "serial selection",
        }
    }
}

/// How details of one line relate to locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationScope {
    /// All details sit at the line's single chosen location (Summary mode).
    SingleLocation,
    /// Each detail carries its own location (Detail mode).
    PerDetail,
}

/// Soft correction: the entered quantity was clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityWarning {
    pub line_no: u32,
    pub location_code: String,
    pub lot_code: Option<String>,
    pub requested: i64,
    pub max_usable: i64,
}

impl core::fmt::Display for CapacityWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.lot_code {
            Some(lot) => write!(
                f,
                "line {} lot {} at {}: {} exceeds the maximum of {}",
                self.line_no, lot, self.location_code, self.requested, self.max_usable
            ),
            None => write!(
                f,
                "line {} at {}: {} exceeds the maximum of {}",
                self.line_no, self.location_code, self.requested, self.max_usable
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub details: LineDetails,
    /// `qty_picked` / `qty_received` derived from `details`.
    pub fulfilled_qty: i64,
    pub warnings: Vec<CapacityWarning>,
    /// Previously accumulated details were discarded because the location changed.
    pub location_reset: bool,
}

impl AllocationOutcome {
    fn new(details: LineDetails, warnings: Vec<CapacityWarning>, location_reset: bool) -> Self {
        Self {
            fulfilled_qty: details.fulfilled_qty(),
            details,
            warnings,
            location_reset,
        }
    }
}

/// Stateless allocation rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocationEngine;

impl AllocationEngine {
    /// Details after switching the line's chosen location.
    ///
    /// Allocation is location-scoped: any change of location starts over.
    pub fn change_location(details: &LineDetails, from: Option<&str>, to: &str) -> LineDetails {
        if from == Some(to) {
            details.clone()
        } else {
            LineDetails::empty(details.tracking_type())
        }
    }

    /// Allocate against on-hand stock (issue side).
    pub fn allocate(
        line_no: u32,
        details: &LineDetails,
        scope: LocationScope,
        stock: &LocationStock,
        input: &AllocationInput,
    ) -> DomainResult<AllocationOutcome> {
        let (mut details, location_reset) = scoped(details, scope, &stock.loc_code);
        let mut warnings = Vec::new();

        match (&mut details, input) {
            (LineDetails::None(detail), AllocationInput::Quantity { qty }) => {
                let max = stock.available_qty.max(0);
                let kept = clamp(*qty, max, || CapacityWarning {
                    line_no,
                    location_code: stock.loc_code.clone(),
                    lot_code: None,
                    requested: *qty,
                    max_usable: max,
                }, &mut warnings);
                *detail = (kept > 0).then(|| QtyDetail {
                    location_code: stock.loc_code.clone(),
                    qty: kept,
                });
            }
            (
                LineDetails::Lot(lots),
                AllocationInput::LotQuantity { lot_code, qty, .. },
            ) => {
                let record = stock
                    .lots
                    .iter()
                    .find(|l| &l.lot_code == lot_code)
                    .ok_or_else(|| {
                        DomainError::validation(format!(
                            "line {line_no}: lot {lot_code} is not on hand at {}",
                            stock.loc_code
                        ))
                    })?;
                let max = record.onhand_qty.max(0);
                let kept = clamp(*qty, max, || CapacityWarning {
                    line_no,
                    location_code: stock.loc_code.clone(),
                    lot_code: Some(lot_code.clone()),
                    requested: *qty,
                    max_usable: max,
                }, &mut warnings);
                upsert_lot(lots, &stock.loc_code, lot_code, kept, record.expiry_date);
            }
            (LineDetails::Serial(serials), AllocationInput::ToggleSerial { serial_no }) => {
                if let Some(idx) = serials.iter().position(|s| &s.serial_no == serial_no) {
                    serials.remove(idx);
                } else if stock.serials.iter().any(|s| &s.serial_no == serial_no) {
                    serials.push(SerialDetail {
                        location_code: stock.loc_code.clone(),
                        serial_no: serial_no.clone(),
                    });
                } else {
                    return Err(DomainError::validation(format!(
                        "line {line_no}: serial {serial_no} is not on hand at {}",
                        stock.loc_code
                    )));
                }
            }
            (details, input) => return Err(mismatch(line_no, details.tracking_type(), input)),
        }

        Ok(AllocationOutcome::new(details, warnings, location_reset))
    }

    /// Enter received details (receipt side), bounded by the planned quantity.
    pub fn receive(
        line_no: u32,
        details: &LineDetails,
        location_code: &str,
        qty_planned: i64,
        input: &AllocationInput,
    ) -> DomainResult<AllocationOutcome> {
        let (mut details, location_reset) =
            scoped(details, LocationScope::SingleLocation, location_code);
        let mut warnings = Vec::new();
        let planned = qty_planned.max(0);

        match (&mut details, input) {
            (LineDetails::None(detail), AllocationInput::Quantity { qty }) => {
                let kept = clamp(*qty, planned, || CapacityWarning {
                    line_no,
                    location_code: location_code.to_string(),
                    lot_code: None,
                    requested: *qty,
                    max_usable: planned,
                }, &mut warnings);
                *detail = (kept > 0).then(|| QtyDetail {
                    location_code: location_code.to_string(),
                    qty: kept,
                });
            }
            (
                LineDetails::Lot(lots),
                AllocationInput::LotQuantity {
                    lot_code,
                    qty,
                    expiry_date,
                },
            ) => {
                if lot_code.trim().is_empty() {
                    return Err(DomainError::validation(format!(
                        "line {line_no}: lot code is required"
                    )));
                }
                let others: i64 = lots
                    .iter()
                    .filter(|l| &l.lot_code != lot_code)
                    .map(|l| l.qty)
                    .sum();
                let max = (planned - others).max(0);
                let kept = clamp(*qty, max, || CapacityWarning {
                    line_no,
                    location_code: location_code.to_string(),
                    lot_code: Some(lot_code.clone()),
                    requested: *qty,
                    max_usable: max,
                }, &mut warnings);
                upsert_lot(lots, location_code, lot_code, kept, *expiry_date);
            }
            (LineDetails::Serial(serials), AllocationInput::ToggleSerial { serial_no }) => {
                if serial_no.trim().is_empty() {
                    return Err(DomainError::validation(format!(
                        "line {line_no}: serial number is required"
                    )));
                }
                if let Some(idx) = serials.iter().position(|s| &s.serial_no == serial_no) {
                    serials.remove(idx);
                } else if (serials.len() as i64) < planned {
                    serials.push(SerialDetail {
                        location_code: location_code.to_string(),
                        serial_no: serial_no.clone(),
                    });
                } else {
                    warnings.push(CapacityWarning {
                        line_no,
                        location_code: location_code.to_string(),
                        lot_code: None,
                        requested: serials.len() as i64 + 1,
                        max_usable: planned,
                    });
                }
            }
            (details, input) => return Err(mismatch(line_no, details.tracking_type(), input)),
        }

        Ok(AllocationOutcome::new(details, warnings, location_reset))
    }
}

/// Details restricted to what survives allocating at `loc_code`.
fn scoped(details: &LineDetails, scope: LocationScope, loc_code: &str) -> (LineDetails, bool) {
    match scope {
        LocationScope::PerDetail => (details.clone(), false),
        LocationScope::SingleLocation => {
            let locations = details.locations();
            if locations.iter().all(|l| *l == loc_code) {
                (details.clone(), false)
            } else {
                (LineDetails::empty(details.tracking_type()), true)
            }
        }
    }
}

fn clamp(
    requested: i64,
    max: i64,
    warning: impl FnOnce() -> CapacityWarning,
    warnings: &mut Vec<CapacityWarning>,
) -> i64 {
    if requested > max {
        warnings.push(warning());
        max
    } else {
        requested.max(0)
    }
}

/// Set, move or drop the record for `lot_code`; at most one per line.
fn upsert_lot(
    lots: &mut Vec<LotDetail>,
    loc_code: &str,
    lot_code: &str,
    qty: i64,
    expiry_date: Option<NaiveDate>,
) {
    let existing = lots.iter().position(|l| l.lot_code == lot_code);
    match (existing, qty > 0) {
        (Some(idx), true) => {
            let lot = &mut lots[idx];
            lot.qty = qty;
            lot.location_code = loc_code.to_string();
            lot.expiry_date = expiry_date;
        }
        (Some(idx), false) => {
            lots.remove(idx);
        }
        (None, true) => lots.push(LotDetail {
            location_code: loc_code.to_string(),
            lot_code: lot_code.to_string(),
            qty,
            expiry_date,
        }),
        (None, false) => {}
    }
}

fn mismatch(line_no: u32, tracking: TrackingType, input: &AllocationInput) -> DomainError {
    DomainError::validation(format!(
        "line {line_no}: tracking type {tracking} does not accept {}",
        input.label()
    ))
}
