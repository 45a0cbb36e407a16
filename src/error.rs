//! # Error Handling
//!
//! Error types shared by the register store, the frame codec, the request
//! dispatcher, the TCP server and the polling client.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: socket read/write failures
//! - **Connection Errors**: bind, connect and accept failures
//! - **Timeout Errors**: idle connections and unanswered requests
//!
//! ### Framing Errors
//! - **Frame Errors**: MBAP header violations. A frame error means the byte
//!   stream is out of sync and the connection has to be closed.
//!
//! ### Request Errors
//! These never close a connection. The dispatcher turns them into Modbus
//! exception responses with [`ModbusError::to_exception`]:
//!
//! | Error | Exception code |
//! |-------|----------------|
//! | `InvalidFunction` | 0x01 Illegal Function |
//! | `InvalidAddress` | 0x02 Illegal Data Address |
//! | `InvalidData` | 0x03 Illegal Data Value |
//! | `UnknownSlave` | 0x0B Gateway Target Device Failed to Respond |
//! | anything else | 0x04 Slave Device Failure |
//!
//! ## Usage Example
//!
//! ```rust
//! use modbus_devsim::{BankKind, ModbusError, RegisterStore};
//! use modbus_devsim::protocol::ModbusException;
//!
//! let store = RegisterStore::new(10);
//! let err = store.read(BankKind::InputRegisters, 8, 4).unwrap_err();
//! assert!(matches!(err, ModbusError::InvalidAddress { start: 8, count: 4, .. }));
//! assert_eq!(err.to_exception(), ModbusException::IllegalDataAddress);
//! ```

use thiserror::Error;

use crate::protocol::ModbusException;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error types
///
/// Each variant carries enough context to be logged on its own; the server
/// never needs the original request to explain a failure.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O related errors (socket read/write)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or maintenance errors
    ///
    /// # Examples
    /// - Address already in use when binding
    /// - Connection refused by the remote slave
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its configured time limit
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol-level errors that do not fit a more specific variant
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Function code not served by this device
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Register access outside the bank
    ///
    /// Raised when `start + count` exceeds the length of the addressed bank.
    #[error("Invalid address: start={start}, count={count}, bank length={len}")]
    InvalidAddress { start: u16, count: u16, len: usize },

    /// Invalid data value (quantity out of range, truncated payload)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Unit identifier with no register store behind it
    #[error("Unknown slave: {slave_id}")]
    UnknownSlave { slave_id: u8 },

    /// Modbus exception response received from a remote slave
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Framing errors
    ///
    /// # Examples
    /// - Protocol identifier other than zero
    /// - MBAP length field smaller than the unit id + function code
    /// - Response byte count disagreeing with the frame length
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (poisoned locks and similar)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid address error
    ///
    /// # Arguments
    ///
    /// * `start` - Starting offset of the access
    /// * `count` - Number of registers accessed
    /// * `len` - Length of the bank that was addressed
    pub fn invalid_address(start: u16, count: u16, len: usize) -> Self {
        Self::InvalidAddress { start, count, len }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create an unknown slave error
    pub fn unknown_slave(slave_id: u8) -> Self {
        Self::UnknownSlave { slave_id }
    }

    /// Create a Modbus exception error from a received exception response
    ///
    /// Standard exception codes are mapped to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match ModbusException::from_u8(code) {
            Some(exception) => exception.name().to_string(),
            None => "Unknown Exception".to_string(),
        };

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Map the error to the exception code a server answers with
    pub fn to_exception(&self) -> ModbusException {
        match self {
            Self::InvalidFunction { .. } => ModbusException::IllegalFunction,
            Self::InvalidAddress { .. } => ModbusException::IllegalDataAddress,
            Self::InvalidData { .. } => ModbusException::IllegalDataValue,
            Self::UnknownSlave { .. } => ModbusException::GatewayTargetDeviceFailedToRespond,
            _ => ModbusException::ServerDeviceFailure,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self,
            Self::Protocol { .. } |
            Self::InvalidFunction { .. } |
            Self::Exception { .. } |
            Self::Frame { .. }
        )
    }

    /// Check if the error desynchronizes the byte stream
    ///
    /// A connection that produced such an error must be closed.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Frame { .. } | Self::Io { .. })
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The elapsed error does not carry the duration; callers that know it build
/// the timeout error themselves.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors (configuration files)
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}
