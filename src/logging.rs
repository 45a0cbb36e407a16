//! Observable server events
//!
//! The server, dispatcher and refresher report what they do as
//! [`ServerEvent`]s through an [`EventLogger`]. The logger either forwards
//! events to the `log` facade, hands them to a user callback, or drops them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::{ModbusException, SlaveId, TransactionId};

/// Log levels for server events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

impl LogLevel {
    fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Something observable happened in the server core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client connected
    ConnectionOpened { peer: SocketAddr },
    /// A client connection ended
    ConnectionClosed { peer: SocketAddr, reason: String },
    /// A complete request frame was decoded
    FrameDecoded {
        peer: SocketAddr,
        transaction_id: TransactionId,
        unit_id: SlaveId,
        function: u8,
    },
    /// A request was answered with an exception response
    ExceptionRaised {
        transaction_id: TransactionId,
        unit_id: SlaveId,
        function: u8,
        exception: ModbusException,
    },
    /// The periodic refresher wrote a new set of values
    RefreshTick { tick: u64, stores: usize, values: Vec<u16> },
}

impl ServerEvent {
    /// Level the event is logged at
    pub fn level(&self) -> LogLevel {
        match self {
            ServerEvent::ConnectionOpened { .. } | ServerEvent::ConnectionClosed { .. } => LogLevel::Info,
            ServerEvent::ExceptionRaised { .. } => LogLevel::Warn,
            ServerEvent::FrameDecoded { .. } | ServerEvent::RefreshTick { .. } => LogLevel::Debug,
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::ConnectionOpened { peer } => write!(f, "Client connected: {}", peer),
            ServerEvent::ConnectionClosed { peer, reason } => {
                write!(f, "Client {} disconnected ({})", peer, reason)
            }
            ServerEvent::FrameDecoded { peer, transaction_id, unit_id, function } => write!(
                f,
                "Request from {}: TID={}, Unit={}, Function=0x{:02X}",
                peer, transaction_id, unit_id, function
            ),
            ServerEvent::ExceptionRaised { transaction_id, unit_id, function, exception } => write!(
                f,
                "Exception response: TID={}, Unit={}, Function=0x{:02X}, {}",
                transaction_id, unit_id, function, exception
            ),
            ServerEvent::RefreshTick { tick, stores, values } => write!(
                f,
                "Refresh tick {}: {} store(s) <- {:?}",
                tick, stores, values
            ),
        }
    }
}

/// Type alias for event callback functions
pub type EventCallback = Box<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Disabled,
    Facade,
    Callback(Arc<EventCallback>),
}

/// Event sink shared by every component of a server
#[derive(Clone)]
pub struct EventLogger {
    sink: Sink,
    min_level: LogLevel,
}

impl EventLogger {
    /// Logger that hands every event at or above `min_level` to `callback`
    pub fn new(callback: EventCallback, min_level: LogLevel) -> Self {
        Self {
            sink: Sink::Callback(Arc::new(callback)),
            min_level,
        }
    }

    /// Logger that forwards events to the `log` facade
    ///
    /// Level filtering is left to the installed logger (`RUST_LOG`).
    pub fn log_facade() -> Self {
        Self {
            sink: Sink::Facade,
            min_level: LogLevel::Debug,
        }
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self {
            sink: Sink::Disabled,
            min_level: LogLevel::Error,
        }
    }

    /// Report an event
    pub fn emit(&self, event: ServerEvent) {
        let level = event.level();
        if level > self.min_level {
            return;
        }

        match &self.sink {
            Sink::Disabled => {}
            Sink::Facade => log::log!(target: "modbus_devsim::events", level.to_log_level(), "{}", event),
            Sink::Callback(callback) => callback(&event),
        }
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::log_facade()
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match self.sink {
            Sink::Disabled => "disabled",
            Sink::Facade => "log",
            Sink::Callback(_) => "callback",
        };
        f.debug_struct("EventLogger")
            .field("sink", &sink)
            .field("min_level", &self.min_level)
            .finish()
    }
}
