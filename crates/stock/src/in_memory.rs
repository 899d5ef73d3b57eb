use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;

use crate::ledger::{
    CommitReceipt, CommitRequest, LedgerError, LotRecord, MovementDirection, MovementUnit,
    OnhandByLocation, SerialRecord, StockLedger, StockLedgerView, StockMovement,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PositionKey {
    wh_code: String,
    loc_code: String,
    model_code: String,
}

impl PositionKey {
    fn new(wh_code: &str, loc_code: &str, model_code: &str) -> Self {
        Self {
            wh_code: wh_code.to_string(),
            loc_code: loc_code.to_string(),
            model_code: model_code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Position {
    onhand: i64,
    allocated: i64,
    lots: BTreeMap<String, LotRecord>,
    serials: BTreeMap<String, SerialRecord>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    positions: BTreeMap<PositionKey, Position>,
}

/// In-memory stock ledger.
///
/// Intended for tests/dev. A commit is applied to a copy of the state and
/// swapped in only when every movement succeeded.
#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    state: RwLock<LedgerState>,
    fail_next: Mutex<Option<String>>,
    committed: Mutex<Vec<CommitRequest>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change one position in place. A poisoned ledger is logged and left
    /// untouched; every later read reports [`LedgerError::Poisoned`].
    fn update_position(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
        f: impl FnOnce(&mut Position),
    ) {
        let Ok(mut state) = self.state.write() else {
            tracing::error!(wh_code, loc_code, model_code, "stock ledger lock poisoned");
            return;
        };
        f(state
            .positions
            .entry(PositionKey::new(wh_code, loc_code, model_code))
            .or_default());
    }

    /// Put untracked on-hand at a position.
    pub fn seed_untracked(&self, wh_code: &str, loc_code: &str, model_code: &str, qty: i64) {
        self.update_position(wh_code, loc_code, model_code, |pos| pos.onhand += qty);
    }

    /// Put a lot on hand; the position on-hand grows by the same quantity.
    pub fn seed_lot(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
        lot_code: &str,
        qty: i64,
        expiry_date: Option<NaiveDate>,
    ) {
        self.update_position(wh_code, loc_code, model_code, |pos| {
            pos.onhand += qty;
            let lot = pos.lots.entry(lot_code.to_string()).or_insert(LotRecord {
                lot_code: lot_code.to_string(),
                onhand_qty: 0,
                expiry_date,
                receipt_date: None,
            });
            lot.onhand_qty += qty;
        });
    }

    /// Put one serial unit on hand.
    pub fn seed_serial(&self, wh_code: &str, loc_code: &str, model_code: &str, serial_no: &str) {
        self.update_position(wh_code, loc_code, model_code, |pos| {
            if pos
                .serials
                .insert(
                    serial_no.to_string(),
                    SerialRecord {
                        serial_no: serial_no.to_string(),
                        receipt_date: None,
                        expiry_date: None,
                    },
                )
                .is_none()
            {
                pos.onhand += 1;
            }
        });
    }

    /// Reserve quantity for open documents (set by the ledger owner).
    pub fn set_allocated(&self, wh_code: &str, loc_code: &str, model_code: &str, qty: i64) {
        self.update_position(wh_code, loc_code, model_code, |pos| {
            pos.allocated = qty.clamp(0, pos.onhand);
        });
    }

    /// Make the next commit fail as if the ledger were unreachable.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        match self.fail_next.lock() {
            Ok(mut slot) => *slot = Some(reason.into()),
            Err(_) => tracing::error!("stock ledger failure switch poisoned"),
        }
    }

    /// Every request applied so far, in order.
    pub fn committed(&self) -> Vec<CommitRequest> {
        self.committed.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn with_position<T>(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
        f: impl FnOnce(&Position) -> T,
    ) -> Result<Option<T>, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state
            .positions
            .get(&PositionKey::new(wh_code, loc_code, model_code))
            .map(f))
    }
}

impl StockLedgerView for InMemoryStockLedger {
    fn onhand(&self, wh_code: &str) -> Result<Vec<OnhandByLocation>, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state
            .positions
            .iter()
            .filter(|(k, _)| k.wh_code == wh_code)
            .map(|(k, p)| {
                OnhandByLocation::new(&k.wh_code, &k.loc_code, &k.model_code, p.onhand, p.allocated)
            })
            .collect())
    }

    fn lots(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
    ) -> Result<Vec<LotRecord>, LedgerError> {
        Ok(self
            .with_position(wh_code, loc_code, model_code, |p| {
                p.lots.values().cloned().collect()
            })?
            .unwrap_or_default())
    }

    fn serials(
        &self,
        wh_code: &str,
        loc_code: &str,
        model_code: &str,
    ) -> Result<Vec<SerialRecord>, LedgerError> {
        Ok(self
            .with_position(wh_code, loc_code, model_code, |p| {
                p.serials.values().cloned().collect()
            })?
            .unwrap_or_default())
    }
}

impl StockLedger for InMemoryStockLedger {
    fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, LedgerError> {
        if let Ok(mut slot) = self.fail_next.lock() {
            if let Some(reason) = slot.take() {
                return Err(LedgerError::Unavailable(reason));
            }
        }

        let mut state = self.state.write().map_err(|_| LedgerError::Poisoned)?;
        let mut next = state.clone();
        for movement in &request.movements {
            apply_movement(&mut next, movement, request.occurred_on).map_err(|reason| {
                LedgerError::CommitRejected(format!(
                    "{} line {}: {reason}",
                    request.doc_no, movement.line_no
                ))
            })?;
        }
        *state = next;

        if let Ok(mut log) = self.committed.lock() {
            log.push(request.clone());
        }
        tracing::debug!(
            doc_no = %request.doc_no,
            movements = request.movements.len(),
            "ledger commit applied"
        );

        Ok(CommitReceipt {
            doc_no: request.doc_no.clone(),
            movements_applied: request.movements.len(),
        })
    }
}

fn apply_movement(
    state: &mut LedgerState,
    movement: &StockMovement,
    occurred_on: NaiveDate,
) -> Result<(), String> {
    if movement.qty <= 0 {
        return Err("movement quantity must be positive".to_string());
    }
    if matches!(movement.unit, MovementUnit::Serial { .. }) && movement.qty != 1 {
        return Err("serial movements move exactly one unit".to_string());
    }

    let key = PositionKey::new(&movement.wh_code, &movement.loc_code, &movement.model_code);

    match movement.direction {
        MovementDirection::In => {
            if let MovementUnit::Serial { serial_no } = &movement.unit {
                let duplicate = state.positions.iter().any(|(k, p)| {
                    k.wh_code == key.wh_code
                        && k.model_code == key.model_code
                        && p.serials.contains_key(serial_no)
                });
                if duplicate {
                    return Err(format!("serial {serial_no} already on hand"));
                }
            }

            let pos = state.positions.entry(key).or_default();
            pos.onhand += movement.qty;
            match &movement.unit {
                MovementUnit::Untracked => {}
                MovementUnit::Lot {
                    lot_code,
                    expiry_date,
                } => {
                    let lot = pos.lots.entry(lot_code.clone()).or_insert(LotRecord {
                        lot_code: lot_code.clone(),
                        onhand_qty: 0,
                        expiry_date: *expiry_date,
                        receipt_date: Some(occurred_on),
                    });
                    lot.onhand_qty += movement.qty;
                }
                MovementUnit::Serial { serial_no } => {
                    pos.serials.insert(
                        serial_no.clone(),
                        SerialRecord {
                            serial_no: serial_no.clone(),
                            receipt_date: Some(occurred_on),
                            expiry_date: None,
                        },
                    );
                }
            }
        }
        MovementDirection::Out => {
            let pos = state
                .positions
                .get_mut(&key)
                .ok_or_else(|| format!("nothing on hand at {}", key.loc_code))?;
            if pos.onhand < movement.qty {
                return Err(format!(
                    "on-hand {} at {} is below {}",
                    pos.onhand, key.loc_code, movement.qty
                ));
            }
            match &movement.unit {
                MovementUnit::Untracked => {}
                MovementUnit::Lot { lot_code, .. } => {
                    let lot = pos
                        .lots
                        .get_mut(lot_code)
                        .ok_or_else(|| format!("lot {lot_code} not on hand at {}", key.loc_code))?;
                    if lot.onhand_qty < movement.qty {
                        return Err(format!(
                            "lot {lot_code} holds {} which is below {}",
                            lot.onhand_qty, movement.qty
                        ));
                    }
                    lot.onhand_qty -= movement.qty;
                    if lot.onhand_qty == 0 {
                        pos.lots.remove(lot_code);
                    }
                }
                MovementUnit::Serial { serial_no } => {
                    if pos.serials.remove(serial_no).is_none() {
                        return Err(format!("serial {serial_no} not on hand at {}", key.loc_code));
                    }
                }
            }
            pos.onhand -= movement.qty;
            pos.allocated -= pos.allocated.min(movement.qty);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    fn out(line_no: u32, loc: &str, unit: MovementUnit, qty: i64) -> StockMovement {
        StockMovement {
            line_no,
            direction: MovementDirection::Out,
            wh_code: "WH1".into(),
            loc_code: loc.into(),
            model_code: "M1".into(),
            unit,
            qty,
        }
    }

    #[test]
    fn failed_movement_leaves_ledger_untouched() {
        let ledger = InMemoryStockLedger::new();
        ledger.seed_untracked("WH1", "A-01", "M1", 5);
        ledger.seed_untracked("WH1", "A-02", "M1", 1);

        let request = CommitRequest {
            doc_no: "GI-202405-0001".into(),
            occurred_on: day(),
            movements: vec![
                out(1, "A-01", MovementUnit::Untracked, 5),
                out(2, "A-02", MovementUnit::Untracked, 2),
            ],
        };

        let err = ledger.commit(&request).unwrap_err();
        assert!(matches!(err, LedgerError::CommitRejected(_)));

        let a01 = ledger.onhand_at("WH1", "A-01", "M1").unwrap().unwrap();
        assert_eq!(a01.onhand_qty, 5);
        assert!(ledger.committed().is_empty());
    }

    #[test]
    fn issue_commit_releases_allocation() {
        let ledger = InMemoryStockLedger::new();
        ledger.seed_untracked("WH1", "A-01", "M1", 10);
        ledger.set_allocated("WH1", "A-01", "M1", 4);

        let request = CommitRequest {
            doc_no: "GI-202405-0002".into(),
            occurred_on: day(),
            movements: vec![out(1, "A-01", MovementUnit::Untracked, 4)],
        };
        ledger.commit(&request).unwrap();

        let pos = ledger.onhand_at("WH1", "A-01", "M1").unwrap().unwrap();
        assert_eq!(pos.onhand_qty, 6);
        assert_eq!(pos.allocated_qty, 0);
        assert_eq!(pos.available_qty, 6);
    }

    #[test]
    fn compensation_restores_lots_and_serials() {
        let ledger = InMemoryStockLedger::new();
        ledger.seed_lot("WH1", "A-01", "M1", "L1", 3, None);
        ledger.seed_serial("WH1", "A-01", "M1", "SN-1");

        let request = CommitRequest {
            doc_no: "GI-202405-0003".into(),
            occurred_on: day(),
            movements: vec![
                out(
                    1,
                    "A-01",
                    MovementUnit::Lot {
                        lot_code: "L1".into(),
                        expiry_date: None,
                    },
                    3,
                ),
                out(
                    1,
                    "A-01",
                    MovementUnit::Serial {
                        serial_no: "SN-1".into(),
                    },
                    1,
                ),
            ],
        };
        ledger.commit(&request).unwrap();
        assert!(ledger.lots("WH1", "A-01", "M1").unwrap().is_empty());

        ledger.commit(&request.compensation()).unwrap();
        let lots = ledger.lots("WH1", "A-01", "M1").unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].onhand_qty, 3);
        assert_eq!(ledger.serials("WH1", "A-01", "M1").unwrap().len(), 1);
        assert_eq!(
            ledger.onhand_at("WH1", "A-01", "M1").unwrap().unwrap().onhand_qty,
            4
        );
    }

    #[test]
    fn injected_failure_is_reported_once() {
        let ledger = InMemoryStockLedger::new();
        ledger.seed_untracked("WH1", "A-01", "M1", 1);
        ledger.fail_next_commit("ledger busy");

        let request = CommitRequest {
            doc_no: "GI-202405-0004".into(),
            occurred_on: day(),
            movements: vec![out(1, "A-01", MovementUnit::Untracked, 1)],
        };
        assert!(matches!(
            ledger.commit(&request),
            Err(LedgerError::Unavailable(_))
        ));
        assert!(ledger.commit(&request).is_ok());
    }

    #[test]
    fn poisoned_ledger_refuses_reads() {
        let ledger = std::sync::Arc::new(InMemoryStockLedger::new());
        ledger.seed_untracked("WH1", "A-01", "M1", 4);
        let shared = ledger.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.state.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        ledger.seed_untracked("WH1", "A-01", "M1", 6);
        assert!(matches!(ledger.onhand("WH1"), Err(LedgerError::Poisoned)));
    }
}

