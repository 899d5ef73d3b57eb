//! Inventory count planning.

use serde::{Deserialize, Serialize};

use forgewms_core::{DomainError, DomainResult};
use forgewms_stock::OnhandByLocation;

use crate::header::CountScope;
use crate::line::{CountLine, SystemQtySnapshot};

/// Locations or models a ByLocation/ByItem plan is restricted to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSelector {
    pub location_codes: Vec<String>,
    pub model_codes: Vec<String>,
}

impl CountSelector {
    pub fn locations<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            location_codes: codes.into_iter().map(Into::into).collect(),
            model_codes: Vec::new(),
        }
    }

    pub fn models<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            location_codes: Vec::new(),
            model_codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Build count lines from the warehouse's on-hand records.
///
/// One line per (location, model), ordered by location then model.
/// `system_qty` stays 0; it is captured when the count leaves Draft.
pub fn generate_plan(
    onhand: &[OnhandByLocation],
    wh_code: &str,
    scope: CountScope,
    selector: &CountSelector,
) -> DomainResult<Vec<CountLine>> {
    match scope {
        CountScope::ByLocation if selector.location_codes.is_empty() => {
            return Err(DomainError::validation(
                "select at least one location for a by-location count",
            ));
        }
        CountScope::ByItem if selector.model_codes.is_empty() => {
            return Err(DomainError::validation(
                "select at least one model for a by-item count",
            ));
        }
        _ => {}
    }

    let mut pairs: Vec<(&str, &str)> = onhand
        .iter()
        .filter(|r| r.wh_code == wh_code)
        .filter(|r| match scope {
            CountScope::Full => true,
            CountScope::ByLocation => selector.location_codes.contains(&r.loc_code),
            CountScope::ByItem => selector.model_codes.contains(&r.model_code),
        })
        .map(|r| (r.loc_code.as_str(), r.model_code.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs.dedup();

    Ok(pairs
        .into_iter()
        .enumerate()
        .map(|(idx, (loc, model))| CountLine::planned(idx as u32 + 1, loc, model))
        .collect())
}

/// Current on-hand for each count line; pairs the ledger no longer lists
/// snapshot as 0.
pub fn snapshot(lines: &[CountLine], wh_code: &str, onhand: &[OnhandByLocation]) -> Vec<SystemQtySnapshot> {
    lines
        .iter()
        .map(|line| SystemQtySnapshot {
            line_no: line.line_no,
            system_qty: onhand
                .iter()
                .find(|r| r.matches(wh_code, &line.location_code, &line.model_code))
                .map_or(0, |r| r.onhand_qty),
        })
        .collect()
}
