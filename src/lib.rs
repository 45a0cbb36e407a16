//! # Modbus Devsim - Modbus TCP Device Simulator
//!
//! A small Modbus/TCP slave that serves register reads from in-memory
//! register stores, with a background task that keeps input registers
//! changing, plus a polling master to watch it.
//!
//! ## Features
//!
//! - **Async server**: one Tokio task per connection, pipelined requests
//!   answered in order, idle timeout and connection limit
//! - **Slave table**: one store for every unit id, or configured unit ids
//!   sharing one store or owning one each
//! - **Live data**: periodic random refresh of an input register window
//! - **Polling client**: `ModbusTcpClient` and the `modpoll` binary
//! - **Event hooks**: connection, request, exception and refresh events
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | ✅ | exception 0x01 |
//! | 0x02 | Read Discrete Inputs | ✅ | exception 0x01 |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//!
//! Every other function code is answered with exception 0x01.
//!
//! ## Quick Start
//!
//! ### Server Example
//!
//! ```rust,no_run
//! use modbus_devsim::{DevsimConfig, ModbusServer, ModbusTcpServer, ModbusResult};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = DevsimConfig::default();
//!     config.validate()?;
//!
//!     let table = Arc::new(config.slaves.build_table());
//!     let mut server = ModbusTcpServer::with_config(config.server_config(), table)?;
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await
//! }
//! ```
//!
//! ### Client Example
//!
//! ```rust,no_run
//! use modbus_devsim::{ModbusClient, ModbusTcpClient, ModbusResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::from_address("127.0.0.1:5020", Duration::from_secs(5)).await?;
//!
//!     let values = client.read_04(1, 0, 10).await?;
//!     println!("Input registers: {:?}", values);
//!
//!     client.close().await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  TCP listener   │    │    Refresher    │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐              │
//! │  ServerCodec    │              │
//! └─────────────────┘              │
//!          │                       │
//! ┌─────────────────┐              │
//! │   Dispatcher    │              │
//! └─────────────────┘              │
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   SlaveTable    │───►│ RegisterStores  │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus PDU definitions
pub mod protocol;

/// MBAP framing codecs
pub mod codec;

/// Lock-guarded register storage
pub mod register_bank;

/// Unit id to register store mapping
pub mod slave_table;

/// Request to response mapping
pub mod dispatcher;

/// Periodic input register refresh
pub mod refresher;

/// Modbus TCP server
pub mod server;

/// Modbus TCP polling client
pub mod client;

/// Simulator configuration
pub mod config;

/// Server event reporting
pub mod logging;

/// Validation, formatting and logger setup
pub mod utils;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ModbusException, ModbusFunction, Request, RequestAdu, Response, ResponseAdu};
pub use codec::{ClientCodec, ServerCodec};
pub use register_bank::{BankKind, RegisterBank, RegisterStore, RegisterStoreStats};
pub use slave_table::{SlaveMode, SlaveTable};
pub use dispatcher::RequestDispatcher;
pub use refresher::{PeriodicRefresher, RefresherConfig};
pub use server::{ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, ServerStats};
pub use client::{poll_once, DataType, ModbusClient, ModbusTcpClient, TransportStats};
pub use config::DevsimConfig;
pub use logging::{EventCallback, EventLogger, LogLevel, ServerEvent};

/// Default timeout for operations (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Devsim v{} - Modbus TCP device simulator", VERSION)
}
