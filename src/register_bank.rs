/// Modbus register bank for server-side data storage
///
/// This module provides thread-safe storage for one slave's coils, discrete
/// inputs, holding registers and input registers. Every bank is a fixed-length
/// sequence of 16-bit values addressed from zero.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use crate::error::{ModbusError, ModbusResult};

/// The four Modbus address spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    DiscreteInputs,
    Coils,
    InputRegisters,
    HoldingRegisters,
}

impl BankKind {
    /// All bank kinds in Modbus table order
    pub const ALL: [BankKind; 4] = [
        BankKind::Coils,
        BankKind::DiscreteInputs,
        BankKind::InputRegisters,
        BankKind::HoldingRegisters,
    ];

    fn name(self) -> &'static str {
        match self {
            BankKind::DiscreteInputs => "discrete inputs",
            BankKind::Coils => "coils",
            BankKind::InputRegisters => "input registers",
            BankKind::HoldingRegisters => "holding registers",
        }
    }
}

impl fmt::Display for BankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-length, lock-guarded sequence of 16-bit values
///
/// Cloning a bank clones the handle, not the values.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    values: Arc<RwLock<Vec<u16>>>,
}

impl RegisterBank {
    /// Create a bank of `len` zeroed values
    pub fn new(len: usize) -> Self {
        Self::from_values(vec![0; len])
    }

    /// Create a bank holding `values`
    pub fn from_values(values: Vec<u16>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    /// Number of values in the bank
    ///
    /// The length never changes, so it is still reported after a writer
    /// panicked while holding the lock.
    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check whether the bank holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_range(start: u16, count: usize, len: usize) -> ModbusResult<std::ops::Range<usize>> {
        let begin = start as usize;
        let end = begin + count;
        if end > len {
            return Err(ModbusError::invalid_address(start, count.min(u16::MAX as usize) as u16, len));
        }
        Ok(begin..end)
    }

    /// Copy `count` values starting at `offset`
    pub fn read(&self, offset: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let values = self
            .values
            .read()
            .map_err(|_| ModbusError::internal("Register bank lock poisoned"))?;
        let range = Self::check_range(offset, count as usize, values.len())?;
        Ok(values[range].to_vec())
    }

    /// Overwrite values starting at `offset`
    ///
    /// Either all values are written or, on a range error, none are.
    pub fn write(&self, offset: u16, new_values: &[u16]) -> ModbusResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| ModbusError::internal("Register bank lock poisoned"))?;
        let range = Self::check_range(offset, new_values.len(), values.len())?;
        values[range].copy_from_slice(new_values);
        Ok(())
    }

    /// Check whether two handles refer to the same storage
    pub fn shares_storage_with(&self, other: &RegisterBank) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

/// Register storage for one slave
///
/// Holds the four banks of a Modbus data model. Reads and writes lock only
/// the bank they touch, and only for the duration of the copy.
#[derive(Debug, Clone)]
pub struct RegisterStore {
    discrete_inputs: RegisterBank,
    coils: RegisterBank,
    input_registers: RegisterBank,
    holding_registers: RegisterBank,
}

impl RegisterStore {
    /// Create a store with four independent banks of `len` values each
    pub fn new(len: usize) -> Self {
        Self::with_lengths(len, len, len, len)
    }

    /// Create a store with independent banks of the given lengths
    pub fn with_lengths(discrete_inputs: usize, coils: usize, input_registers: usize, holding_registers: usize) -> Self {
        Self {
            discrete_inputs: RegisterBank::new(discrete_inputs),
            coils: RegisterBank::new(coils),
            input_registers: RegisterBank::new(input_registers),
            holding_registers: RegisterBank::new(holding_registers),
        }
    }

    /// Create a store whose four address spaces share one bank of `len` values
    ///
    /// A write through any bank kind is visible through all of them.
    pub fn aliased(len: usize) -> Self {
        let block = RegisterBank::new(len);
        Self {
            discrete_inputs: block.clone(),
            coils: block.clone(),
            input_registers: block.clone(),
            holding_registers: block,
        }
    }

    /// Handle to one bank
    pub fn bank(&self, kind: BankKind) -> &RegisterBank {
        match kind {
            BankKind::DiscreteInputs => &self.discrete_inputs,
            BankKind::Coils => &self.coils,
            BankKind::InputRegisters => &self.input_registers,
            BankKind::HoldingRegisters => &self.holding_registers,
        }
    }

    /// Read `count` values of `kind` starting at `offset`
    pub fn read(&self, kind: BankKind, offset: u16, count: u16) -> ModbusResult<Vec<u16>> {
        self.bank(kind).read(offset, count)
    }

    /// Write `values` into `kind` starting at `offset`
    pub fn write(&self, kind: BankKind, offset: u16, values: &[u16]) -> ModbusResult<()> {
        self.bank(kind).write(offset, values)
    }

    /// Length of one bank
    pub fn len(&self, kind: BankKind) -> usize {
        self.bank(kind).len()
    }

    /// Check whether all four kinds are backed by one bank
    pub fn is_aliased(&self) -> bool {
        BankKind::ALL
            .iter()
            .all(|&kind| self.bank(kind).shares_storage_with(&self.holding_registers))
    }

    /// Get register store statistics
    pub fn get_stats(&self) -> RegisterStoreStats {
        RegisterStoreStats {
            discrete_inputs_count: self.discrete_inputs.len(),
            coils_count: self.coils.len(),
            input_registers_count: self.input_registers.len(),
            holding_registers_count: self.holding_registers.len(),
            aliased: self.is_aliased(),
        }
    }
}

/// Register store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterStoreStats {
    pub discrete_inputs_count: usize,
    pub coils_count: usize,
    pub input_registers_count: usize,
    pub holding_registers_count: usize,
    pub aliased: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_read_after_write() {
        let store = RegisterStore::new(10);

        for offset in 0..10u16 {
            for count in 0..=(10 - offset) {
                let values: Vec<u16> = (0..count).map(|i| offset * 100 + i).collect();
                store.write(BankKind::HoldingRegisters, offset, &values).unwrap();
                assert_eq!(store.read(BankKind::HoldingRegisters, offset, count).unwrap(), values);
            }
        }
    }

    #[test]
    fn test_out_of_range_access() {
        let store = RegisterStore::new(10);

        assert!(matches!(
            store.read(BankKind::InputRegisters, 5, 6),
            Err(ModbusError::InvalidAddress { start: 5, count: 6, len: 10 })
        ));
        assert!(store.read(BankKind::InputRegisters, 10, 1).is_err());
        assert!(store.read(BankKind::InputRegisters, u16::MAX, u16::MAX).is_err());
        assert!(store.write(BankKind::InputRegisters, 9, &[1, 2]).is_err());

        // A rejected write leaves the bank untouched
        assert_eq!(store.read(BankKind::InputRegisters, 9, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_independent_banks() {
        let store = RegisterStore::with_lengths(1, 2, 3, 4);
        store.write(BankKind::InputRegisters, 0, &[7, 7, 7]).unwrap();

        assert_eq!(store.read(BankKind::HoldingRegisters, 0, 4).unwrap(), vec![0; 4]);
        assert!(!store.is_aliased());
        assert_eq!(store.get_stats().holding_registers_count, 4);
    }

    #[test]
    fn test_aliased_banks() {
        let store = RegisterStore::aliased(10);
        store.write(BankKind::InputRegisters, 0, &[5, 130, 998]).unwrap();

        for kind in BankKind::ALL {
            assert_eq!(store.read(kind, 0, 3).unwrap(), vec![5, 130, 998]);
        }
        assert!(store.get_stats().aliased);
    }

    #[test]
    fn test_reads_never_observe_partial_writes() {
        let store = Arc::new(RegisterStore::new(64));

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for tick in 0..2000u16 {
                    store.write(BankKind::InputRegisters, 0, &[tick; 64]).unwrap();
                }
            })
        };

        for _ in 0..2000 {
            let values = store.read(BankKind::InputRegisters, 0, 64).unwrap();
            assert!(values.iter().all(|&v| v == values[0]), "torn read: {:?}", values);
        }

        writer.join().unwrap();
    }

    #[test]
    fn test_poisoned_bank_keeps_length() {
        let bank = RegisterBank::new(4);
        let handle = bank.clone();
        let _ = thread::spawn(move || {
            let _guard = handle.values.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert_eq!(bank.len(), 4);
        assert!(!bank.is_empty());
        assert!(matches!(bank.read(0, 1), Err(ModbusError::Internal { .. })));
        assert!(matches!(bank.write(0, &[1]), Err(ModbusError::Internal { .. })));
    }
}
