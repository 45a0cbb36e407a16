/// Periodic input register refresher
///
/// Simulates live process data: at a fixed period a fresh window of random
/// values is written into the input registers of every store in a slave table.

use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ModbusError, ModbusResult};
use crate::logging::{EventLogger, ServerEvent};
use crate::register_bank::{BankKind, RegisterStore};
use crate::slave_table::SlaveTable;

/// Refresher settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefresherConfig {
    pub period: Duration,
    pub offset: u16,
    pub count: u16,
    pub min_value: u16,
    pub max_value: u16,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            offset: 0,
            count: 10,
            min_value: 0,
            max_value: 1000,
        }
    }
}

impl RefresherConfig {
    pub fn validate(&self) -> ModbusResult<()> {
        if self.period.is_zero() {
            return Err(ModbusError::configuration("Refresh period must be greater than zero"));
        }
        if self.min_value > self.max_value {
            return Err(ModbusError::configuration(format!(
                "Refresh range {}..={} is empty",
                self.min_value, self.max_value
            )));
        }
        Ok(())
    }
}

/// Writes random values into input registers at a fixed period
pub struct PeriodicRefresher {
    stores: Vec<Arc<RegisterStore>>,
    config: RefresherConfig,
    rng: StdRng,
    ticks: u64,
    events: EventLogger,
}

impl PeriodicRefresher {
    /// Refresher over every distinct store of `table`
    pub fn new(table: &SlaveTable, config: RefresherConfig) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self {
            stores: table.stores(),
            config,
            rng: StdRng::from_entropy(),
            ticks: 0,
            events: EventLogger::log_facade(),
        })
    }

    /// Use a fixed seed so generated values are reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = events;
        self
    }

    /// Number of ticks performed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn config(&self) -> &RefresherConfig {
        &self.config
    }

    /// Perform one refresh and return the values written
    ///
    /// Every store receives the same values. A store whose input register bank
    /// is too short for the window is skipped with a warning.
    pub fn tick(&mut self) -> Vec<u16> {
        let RefresherConfig { offset, count, min_value, max_value, .. } = self.config;
        let values: Vec<u16> = (0..count)
            .map(|_| self.rng.gen_range(min_value..=max_value))
            .collect();

        let mut written = 0;
        for store in &self.stores {
            match store.write(BankKind::InputRegisters, offset, &values) {
                Ok(()) => written += 1,
                Err(e) => warn!("Refresh write skipped: {}", e),
            }
        }

        self.ticks += 1;
        self.events.emit(ServerEvent::RefreshTick {
            tick: self.ticks,
            stores: written,
            values: values.clone(),
        });
        values
    }

    /// Run until `shutdown` is cancelled
    ///
    /// The first refresh happens immediately.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Refreshing input registers {}..{} of {} store(s) every {:?}",
            self.config.offset,
            self.config.offset as u32 + self.config.count as u32,
            self.stores.len(),
            self.config.period
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Refresher stopped after {} ticks", self.ticks);
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        self.ticks
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }
}
