//! Pre-submit availability checks.
//!
//! These run across the whole document on every submit, not per
//! keystroke, and read the ledger as it is at that moment.

use std::collections::HashMap;

use forgewms_core::FieldViolation;
use forgewms_stock::{LedgerError, StockLedgerView};

use crate::document::Document;
use crate::header::IssueMode;
use crate::status::DocumentKind;
use crate::transfer::transfer_issue_mode;

/// Lines whose planned quantity exceeds what the source can supply.
///
/// * Summary-mode issues compare against the line's single (model, location).
/// * Detail-mode issues compare against the model's total available
///   quantity in the source warehouse.
/// * Transfers are checked the way their generated issue will be.
///
/// Receipts and counts never fail this check.
pub fn availability_violations<L>(
    doc: &Document,
    ledger: &L,
) -> Result<Vec<FieldViolation>, LedgerError>
where
    L: StockLedgerView + ?Sized,
{
    let mode = match doc.kind() {
        DocumentKind::Issue => doc.header().issue_mode().unwrap_or(IssueMode::Summary),
        DocumentKind::Transfer => transfer_issue_mode(doc.lines()),
        DocumentKind::Receipt | DocumentKind::Count => return Ok(Vec::new()),
    };

    let wh = doc.header().warehouse_code.as_str();
    let mut out = Vec::new();

    match mode {
        IssueMode::Summary => {
            // Lines drawing on the same (model, location) share its stock.
            let mut planned: HashMap<(&str, &str), i64> = HashMap::new();
            for line in doc.lines() {
                if let Some(loc) = line.location_code.as_deref() {
                    *planned.entry((line.model_code.as_str(), loc)).or_default() += line.qty_planned;
                }
            }
            let mut available: HashMap<(&str, &str), i64> = HashMap::new();
            for (idx, line) in doc.lines().iter().enumerate() {
                let Some(loc) = line.location_code.as_deref() else {
                    out.push(FieldViolation::new(
                        format!("lines[{idx}].location_code"),
                        "location is required in summary mode",
                    ));
                    continue;
                };
                let key = (line.model_code.as_str(), loc);
                let max = match available.get(&key) {
                    Some(v) => *v,
                    None => {
                        let v = ledger
                            .onhand_at(wh, loc, &line.model_code)?
                            .map_or(0, |r| r.available_qty.max(0));
                        available.insert(key, v);
                        v
                    }
                };
                let total = planned.get(&key).copied().unwrap_or(line.qty_planned);
                if total > max {
                    out.push(FieldViolation::new(
                        format!("lines[{idx}].qty_planned"),
                        format!(
                            "{total} of {} requested but location {loc} has at most {max} available",
                            line.model_code
                        ),
                    ));
                }
            }
        }
        IssueMode::Detail => {
            // Lines of the same model share the warehouse total.
            let mut planned: HashMap<&str, i64> = HashMap::new();
            for line in doc.lines() {
                *planned.entry(line.model_code.as_str()).or_default() += line.qty_planned;
            }
            let mut available: HashMap<&str, i64> = HashMap::new();
            for (idx, line) in doc.lines().iter().enumerate() {
                let model = line.model_code.as_str();
                let max = match available.get(model) {
                    Some(v) => *v,
                    None => {
                        let v = ledger.available_in_warehouse(wh, model)?.max(0);
                        available.insert(model, v);
                        v
                    }
                };
                let total = planned.get(model).copied().unwrap_or(line.qty_planned);
                if total > max {
                    out.push(FieldViolation::new(
                        format!("lines[{idx}].qty_planned"),
                        format!(
                            "{total} of {model} requested but warehouse {wh} has at most {max} available"
                        ),
                    ));
                }
            }
        }
    }

    if !out.is_empty() {
        tracing::debug!(
            doc_no = %doc.doc_no(),
            violations = out.len(),
            "availability check failed"
        );
    }

    Ok(out)
}
