//! Master-data activity flags and the dependency usage behind deactivation.

use std::collections::HashMap;
use std::sync::RwLock;

use forgewms_core::DomainError;
use forgewms_documents::{DependencyUsage, Document, MasterRecord};
use forgewms_stock::StockLedgerView;

use crate::error::ServiceError;

#[derive(Debug, Default)]
struct RegistryState {
    active: HashMap<MasterRecord, bool>,
    org_warehouses: HashMap<String, Vec<String>>,
    model_goods_type: HashMap<String, String>,
}

/// In-memory registry of master records and the relations deactivation
/// guards need (warehouses per organization, goods type per model).
#[derive(Debug, Default)]
pub struct MasterDataRegistry {
    inner: RwLock<RegistryState>,
}

impl MasterDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>, DomainError> {
        self.inner.write().map_err(|_| {
            tracing::error!("master data lock poisoned");
            DomainError::invariant("master data lock poisoned")
        })
    }

    /// Register an active record; re-registering reactivates it.
    pub fn register(&self, record: MasterRecord) -> Result<(), DomainError> {
        self.write()?.active.insert(record, true);
        Ok(())
    }

    pub fn assign_warehouse(&self, org_code: &str, wh_code: &str) -> Result<(), DomainError> {
        let mut state = self.write()?;
        let whs = state.org_warehouses.entry(org_code.to_string()).or_default();
        if !whs.iter().any(|w| w == wh_code) {
            whs.push(wh_code.to_string());
        }
        Ok(())
    }

    pub fn classify_model(&self, model_code: &str, goods_type_code: &str) -> Result<(), DomainError> {
        self.write()?
            .model_goods_type
            .insert(model_code.to_string(), goods_type_code.to_string());
        Ok(())
    }

    pub fn is_registered(&self, record: &MasterRecord) -> bool {
        self.inner
            .read()
            .map(|s| s.active.contains_key(record))
            .unwrap_or(false)
    }

    pub fn is_active(&self, record: &MasterRecord) -> bool {
        self.inner
            .read()
            .ok()
            .and_then(|s| s.active.get(record).copied())
            .unwrap_or(false)
    }

    /// Flip a record to inactive. Guards are checked by the caller.
    pub fn deactivate(&self, record: &MasterRecord) -> Result<(), DomainError> {
        let mut state = self.write()?;
        match state.active.get_mut(record) {
            Some(active) => {
                *active = false;
                Ok(())
            }
            None => Err(DomainError::not_found()),
        }
    }

    /// Codes of every registered warehouse.
    pub fn warehouses(&self) -> Vec<String> {
        let Ok(state) = self.inner.read() else {
            return Vec::new();
        };
        let mut out: Vec<String> = state
            .active
            .keys()
            .filter_map(|r| match r {
                MasterRecord::Warehouse { wh_code } => Some(wh_code.clone()),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    pub fn warehouses_of(&self, org_code: &str) -> Vec<String> {
        self.inner
            .read()
            .ok()
            .and_then(|s| s.org_warehouses.get(org_code).cloned())
            .unwrap_or_default()
    }

    /// Active models classified under a goods type.
    pub fn models_of_goods_type(&self, goods_type_code: &str) -> u64 {
        let Ok(state) = self.inner.read() else {
            return 0;
        };
        state
            .model_goods_type
            .iter()
            .filter(|(_, gt)| gt.as_str() == goods_type_code)
            .filter(|(model, _)| {
                let key = MasterRecord::ModelGoods {
                    model_code: (*model).clone(),
                };
                state.active.get(&key).copied().unwrap_or(true)
            })
            .count() as u64
    }
}

/// Answers dependency questions from the ledger, the stored documents and
/// the registry.
pub struct DocumentUsage<'a, L: ?Sized> {
    pub(crate) ledger: &'a L,
    pub(crate) registry: &'a MasterDataRegistry,
    pub(crate) documents: Vec<Document>,
}

impl<L> DocumentUsage<'_, L>
where
    L: StockLedgerView + ?Sized,
{
    fn onhand_where(
        &self,
        wh_code: &str,
        keep: impl Fn(&forgewms_stock::OnhandByLocation) -> bool,
    ) -> Result<u64, ServiceError> {
        Ok(self
            .ledger
            .onhand(wh_code)?
            .iter()
            .filter(|r| keep(r))
            .map(|r| r.onhand_qty.max(0) as u64)
            .sum())
    }

    fn open_documents(&self, keep: impl Fn(&Document) -> bool) -> u64 {
        self.documents
            .iter()
            .filter(|d| !d.status().is_terminal())
            .filter(|d| keep(d))
            .count() as u64
    }
}

impl<L> DependencyUsage for DocumentUsage<'_, L>
where
    L: StockLedgerView + ?Sized,
{
    type Error = ServiceError;

    fn dependent_usage(&self, record: &MasterRecord) -> Result<u64, Self::Error> {
        match record {
            MasterRecord::Warehouse { wh_code } => self.onhand_where(wh_code, |_| true),
            MasterRecord::Location { wh_code, loc_code } => {
                self.onhand_where(wh_code, |r| &r.loc_code == loc_code)
            }
            MasterRecord::ModelGoods { model_code } => {
                let mut total = 0;
                for wh in self.registry.warehouses() {
                    total += self.onhand_where(&wh, |r| &r.model_code == model_code)?;
                }
                Ok(total)
            }
            MasterRecord::Organization { org_code } => {
                let whs = self.registry.warehouses_of(org_code);
                Ok(self.open_documents(|d| whs.contains(&d.header().warehouse_code)))
            }
            MasterRecord::Partner { partner_code } => Ok(self.open_documents(|d| {
                d.header().partner_code() == Some(partner_code.as_str())
            })),
            MasterRecord::GoodsType { goods_type_code } => {
                Ok(self.registry.models_of_goods_type(goods_type_code))
            }
        }
    }
}
