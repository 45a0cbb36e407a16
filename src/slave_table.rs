/// Slave/unit identifier to register store mapping
///
/// A table is built in one of two modes:
/// - **single**: every unit id resolves to the same store
/// - **multi**: only configured unit ids resolve; several ids may share one
///   store or each may own its own

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::register_bank::RegisterStore;

/// Lowest assignable slave address
pub const MIN_SLAVE_ID: SlaveId = 1;

/// Highest assignable slave address
pub const MAX_SLAVE_ID: SlaveId = 247;

/// How configured slave ids are backed by register stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaveMode {
    /// One store answers every unit id
    Single,
    /// Configured ids share one store, other ids are unknown
    Shared,
    /// Each configured id owns a store, other ids are unknown
    Isolated,
}

#[derive(Debug, Clone)]
enum Contexts {
    Single(Arc<RegisterStore>),
    Multi(BTreeMap<SlaveId, Arc<RegisterStore>>),
}

/// Register stores indexed by unit identifier
#[derive(Debug, Clone)]
pub struct SlaveTable {
    contexts: Contexts,
}

impl SlaveTable {
    /// Table where every unit id maps to `store`
    pub fn single(store: Arc<RegisterStore>) -> Self {
        Self {
            contexts: Contexts::Single(store),
        }
    }

    /// Table with one entry per configured unit id
    pub fn multi<I>(stores: I) -> Self
    where
        I: IntoIterator<Item = (SlaveId, Arc<RegisterStore>)>,
    {
        Self {
            contexts: Contexts::Multi(stores.into_iter().collect()),
        }
    }

    /// Build a table for `ids` in the given mode
    ///
    /// `make_store` is called once per distinct store: once for `Single` and
    /// `Shared`, once per id for `Isolated`.
    pub fn build<F>(mode: SlaveMode, ids: &[SlaveId], mut make_store: F) -> Self
    where
        F: FnMut() -> RegisterStore,
    {
        match mode {
            SlaveMode::Single => Self::single(Arc::new(make_store())),
            SlaveMode::Shared => {
                let store = Arc::new(make_store());
                Self::multi(ids.iter().map(|&id| (id, store.clone())))
            }
            SlaveMode::Isolated => Self::multi(ids.iter().map(|&id| (id, Arc::new(make_store())))),
        }
    }

    /// Resolve the store for `slave_id`
    pub fn get(&self, slave_id: SlaveId) -> ModbusResult<Arc<RegisterStore>> {
        match &self.contexts {
            Contexts::Single(store) => Ok(store.clone()),
            Contexts::Multi(stores) => stores
                .get(&slave_id)
                .cloned()
                .ok_or_else(|| ModbusError::unknown_slave(slave_id)),
        }
    }

    /// Check whether this table answers every unit id
    pub fn is_single(&self) -> bool {
        matches!(self.contexts, Contexts::Single(_))
    }

    /// Configured unit ids in ascending order (empty in single mode)
    pub fn slave_ids(&self) -> Vec<SlaveId> {
        match &self.contexts {
            Contexts::Single(_) => Vec::new(),
            Contexts::Multi(stores) => stores.keys().copied().collect(),
        }
    }

    /// Every distinct store exactly once
    pub fn stores(&self) -> Vec<Arc<RegisterStore>> {
        match &self.contexts {
            Contexts::Single(store) => vec![store.clone()],
            Contexts::Multi(stores) => {
                let mut distinct: Vec<Arc<RegisterStore>> = Vec::new();
                for store in stores.values() {
                    if !distinct.iter().any(|known| Arc::ptr_eq(known, store)) {
                        distinct.push(store.clone());
                    }
                }
                distinct
            }
        }
    }
}
