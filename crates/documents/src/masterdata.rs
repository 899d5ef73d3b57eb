//! Deactivation guards for master records.

use serde::{Deserialize, Serialize};

/// A master record that can be deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterRecord {
    Warehouse { wh_code: String },
    Location { wh_code: String, loc_code: String },
    Organization { org_code: String },
    Partner { partner_code: String },
    ModelGoods { model_code: String },
    GoodsType { goods_type_code: String },
}

impl MasterRecord {
    pub fn label(&self) -> String {
        match self {
            MasterRecord::Warehouse { wh_code } => format!("warehouse {wh_code}"),
            MasterRecord::Location { wh_code, loc_code } => {
                format!("location {loc_code} in {wh_code}")
            }
            MasterRecord::Organization { org_code } => format!("organization {org_code}"),
            MasterRecord::Partner { partner_code } => format!("partner {partner_code}"),
            MasterRecord::ModelGoods { model_code } => format!("model {model_code}"),
            MasterRecord::GoodsType { goods_type_code } => format!("goods type {goods_type_code}"),
        }
    }
}

/// Answers how much a master record is still depended on.
///
/// The meaning of the number depends on the record: on-hand units for
/// warehouses, locations and models; open documents for organizations and
/// partners; referencing models for goods types.
pub trait DependencyUsage {
    type Error;

    fn dependent_usage(&self, record: &MasterRecord) -> Result<u64, Self::Error>;
}

/// Human-readable reason deactivation is blocked, if it is.
pub fn deactivation_blocker(record: &MasterRecord, usage: u64) -> Option<String> {
    if usage == 0 {
        return None;
    }
    let what = match record {
        MasterRecord::Warehouse { .. }
        | MasterRecord::Location { .. }
        | MasterRecord::ModelGoods { .. } => format!("{usage} unit(s) on hand"),
        MasterRecord::Organization { .. } | MasterRecord::Partner { .. } => {
            format!("{usage} active document(s)")
        }
        MasterRecord::GoodsType { .. } => format!("{usage} model(s) using it"),
    };
    Some(format!("{} cannot be deactivated: it has {what}", record.label()))
}
