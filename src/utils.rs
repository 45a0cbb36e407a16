/// Validation, formatting and logger setup helpers
///
/// Shared by the library and the `devsim` / `modpoll` binaries.

use std::time::Duration;
use crate::error::{ModbusError, ModbusResult};

/// Data validation utilities
pub mod validation {
    use super::*;
    use crate::slave_table::{MAX_SLAVE_ID, MIN_SLAVE_ID};

    /// Validate slave ID (1-247)
    pub fn validate_slave_id(slave_id: u8) -> ModbusResult<()> {
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&slave_id) {
            return Err(ModbusError::configuration(format!(
                "Invalid slave ID: {} (must be {}-{})",
                slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
            )));
        }
        Ok(())
    }

    /// Convert a 1-based data reference (1-65536) into a protocol address
    pub fn reference_to_address(reference: u32) -> ModbusResult<u16> {
        if !(1..=65536).contains(&reference) {
            return Err(ModbusError::configuration(format!(
                "Invalid start reference: {} (must be 1-65536)",
                reference
            )));
        }
        Ok((reference - 1) as u16)
    }

    /// Validate register count for read operations
    pub fn validate_register_count(count: u16) -> ModbusResult<()> {
        if count == 0 || count > crate::MAX_REGISTERS_PER_REQUEST {
            return Err(ModbusError::configuration(format!(
                "Invalid register count: {} (must be 1-{})",
                count,
                crate::MAX_REGISTERS_PER_REQUEST
            )));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format register values as hex
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// One poll result line per value, numbered from `reference`
    pub fn poll_lines(reference: u32, values: &[u16]) -> Vec<String> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| format!("[{}]: {}", reference + i as u32, value))
            .collect()
    }
}

/// Logging utilities
pub mod logging {
    use std::io::Write;

    /// Install the process logger
    ///
    /// Defaults to `info` (`debug` when `verbose`); `RUST_LOG` overrides both.
    pub fn init_logger(verbose: bool) {
        let default_level = if verbose { "debug" } else { "info" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{:<5}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.args()
                )
            })
            .init();
    }

    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}
