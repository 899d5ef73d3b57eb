//! Ledger movements produced by completing a document.

use chrono::NaiveDate;

use forgewms_stock::{
    CommitRequest, LineDetails, MovementDirection, MovementUnit, StockMovement,
};

use crate::document::Document;
use crate::status::DocumentKind;

/// Movements for every line detail: receipts move stock in, issues move it
/// out. Transfers and counts never touch the ledger directly.
pub fn stock_movements(doc: &Document) -> Vec<StockMovement> {
    let direction = match doc.kind() {
        DocumentKind::Receipt => MovementDirection::In,
        DocumentKind::Issue => MovementDirection::Out,
        DocumentKind::Transfer | DocumentKind::Count => return Vec::new(),
    };
    let wh_code = &doc.header().warehouse_code;

    let mut out = Vec::new();
    for line in doc.lines() {
        let movement = |loc_code: &str, unit: MovementUnit, qty: i64| StockMovement {
            line_no: line.line_no,
            direction,
            wh_code: wh_code.clone(),
            loc_code: loc_code.to_string(),
            model_code: line.model_code.clone(),
            unit,
            qty,
        };
        match &line.details {
            LineDetails::None(Some(d)) if d.qty > 0 => {
                out.push(movement(&d.location_code, MovementUnit::Untracked, d.qty));
            }
            LineDetails::None(_) => {}
            LineDetails::Lot(lots) => {
                for lot in lots.iter().filter(|l| l.qty > 0) {
                    out.push(movement(
                        &lot.location_code,
                        MovementUnit::Lot {
                            lot_code: lot.lot_code.clone(),
                            expiry_date: lot.expiry_date,
                        },
                        lot.qty,
                    ));
                }
            }
            LineDetails::Serial(serials) => {
                for s in serials {
                    out.push(movement(
                        &s.location_code,
                        MovementUnit::Serial {
                            serial_no: s.serial_no.clone(),
                        },
                        1,
                    ));
                }
            }
        }
    }
    out
}

/// The single whole-document request sent to the ledger on completion.
pub fn commit_request(doc: &Document, occurred_on: NaiveDate) -> CommitRequest {
    CommitRequest {
        doc_no: doc.doc_no().to_string(),
        occurred_on,
        movements: stock_movements(doc),
    }
}
