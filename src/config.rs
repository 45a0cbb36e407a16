//! # Simulator configuration
//!
//! [`DevsimConfig`] describes a complete simulator: where to listen, which
//! slave ids exist and how they share storage, and how input registers are
//! refreshed. Every field has a default, so an empty JSON object is a valid
//! configuration and reproduces the stock simulator:
//!
//! | Setting | Default |
//! |---------|---------|
//! | `server.bind_address` | `127.0.0.1:5020` |
//! | `server.max_connections` | `100` |
//! | `server.idle_timeout_secs` | `60` |
//! | `slaves.ids` | `[1, 2, 3]` |
//! | `slaves.mode` | `shared` |
//! | `slaves.block_size` | `10` |
//! | `slaves.aliased_banks` | `true` |
//! | `refresh.enabled` | `true` |
//! | `refresh.interval_ms` | `100` |
//! | `refresh.offset` / `refresh.count` | `0` / `10` |
//! | `refresh.min_value` / `refresh.max_value` | `0` / `1000` |
//!
//! ```rust
//! use modbus_devsim::config::DevsimConfig;
//!
//! let config: DevsimConfig = serde_json::from_str(r#"{ "slaves": { "mode": "isolated" } }"#).unwrap();
//! config.validate().unwrap();
//! let table = config.slaves.build_table();
//! assert_eq!(table.stores().len(), 3);
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::refresher::RefresherConfig;
use crate::register_bank::RegisterStore;
use crate::server::ModbusTcpServerConfig;
use crate::slave_table::{SlaveMode, SlaveTable};
use crate::utils::validation;

/// Complete simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevsimConfig {
    pub server: ServerSection,
    pub slaves: SlaveConfig,
    pub refresh: RefreshSection,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    pub idle_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 5020)),
            max_connections: 100,
            idle_timeout_secs: 60,
        }
    }
}

/// Slave ids and their register storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    pub ids: Vec<SlaveId>,
    pub mode: SlaveMode,
    /// Values per bank
    pub block_size: u16,
    /// Back all four address spaces of a store with one bank
    pub aliased_banks: bool,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            ids: vec![1, 2, 3],
            mode: SlaveMode::Shared,
            block_size: 10,
            aliased_banks: true,
        }
    }
}

impl SlaveConfig {
    pub fn validate(&self) -> ModbusResult<()> {
        if self.mode != SlaveMode::Single && self.ids.is_empty() {
            return Err(ModbusError::configuration("At least one slave id is required"));
        }

        let mut seen = BTreeSet::new();
        for &id in &self.ids {
            validation::validate_slave_id(id)?;
            if !seen.insert(id) {
                return Err(ModbusError::configuration(format!("Duplicate slave id {}", id)));
            }
        }

        if self.block_size == 0 {
            return Err(ModbusError::configuration("Block size must be at least 1"));
        }
        Ok(())
    }

    /// Fresh zeroed store laid out as configured
    pub fn make_store(&self) -> RegisterStore {
        let len = self.block_size as usize;
        if self.aliased_banks {
            RegisterStore::aliased(len)
        } else {
            RegisterStore::new(len)
        }
    }

    /// Build the slave table
    pub fn build_table(&self) -> SlaveTable {
        SlaveTable::build(self.mode, &self.ids, || self.make_store())
    }
}

/// Input register refresh settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSection {
    pub enabled: bool,
    pub interval_ms: u64,
    pub offset: u16,
    pub count: u16,
    pub min_value: u16,
    pub max_value: u16,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 100,
            offset: 0,
            count: 10,
            min_value: 0,
            max_value: 1000,
        }
    }
}

impl RefreshSection {
    /// Refresher settings, `None` when refreshing is disabled
    pub fn refresher_config(&self) -> Option<RefresherConfig> {
        self.enabled.then(|| RefresherConfig {
            period: Duration::from_millis(self.interval_ms),
            offset: self.offset,
            count: self.count,
            min_value: self.min_value,
            max_value: self.max_value,
        })
    }
}

impl DevsimConfig {
    /// Load a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> ModbusResult<()> {
        if self.server.max_connections == 0 {
            return Err(ModbusError::configuration("max_connections must be at least 1"));
        }
        if self.server.idle_timeout_secs == 0 {
            return Err(ModbusError::configuration("idle_timeout_secs must be at least 1"));
        }

        self.slaves.validate()?;

        if let Some(refresh) = self.refresh.refresher_config() {
            refresh.validate()?;
            let end = refresh.offset as u32 + refresh.count as u32;
            if end > self.slaves.block_size as u32 {
                return Err(ModbusError::configuration(format!(
                    "Refresh window {}..{} exceeds block size {}",
                    refresh.offset, end, self.slaves.block_size
                )));
            }
        }
        Ok(())
    }

    /// Server settings derived from this configuration
    pub fn server_config(&self) -> ModbusTcpServerConfig {
        ModbusTcpServerConfig {
            bind_address: self.server.bind_address,
            max_connections: self.server.max_connections,
            idle_timeout: Duration::from_secs(self.server.idle_timeout_secs),
            refresh: self.refresh.refresher_config(),
        }
    }
}
