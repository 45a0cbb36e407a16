/// Modbus TCP server
///
/// Accepts connections, runs one task per connection and answers every
/// decoded request through a [`RequestDispatcher`]. When configured, a
/// [`PeriodicRefresher`] runs alongside and shares the server's shutdown.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use log::{debug, error, info, warn};

use crate::codec::ServerCodec;
use crate::dispatcher::RequestDispatcher;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::{EventLogger, ServerEvent};
use crate::refresher::{PeriodicRefresher, RefresherConfig};
use crate::slave_table::SlaveTable;

/// Modbus server trait
#[async_trait]
pub trait ModbusServer: Send + Sync {
    /// Bind and start serving in the background
    async fn start(&mut self) -> ModbusResult<()>;

    /// Stop accepting, close every connection and wait for background tasks
    async fn stop(&mut self) -> ModbusResult<()>;

    /// Check if server is running
    fn is_running(&self) -> bool;

    /// Get server statistics
    fn get_stats(&self) -> ServerStats;

    /// Address the listener is bound to, once started
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections_count: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_requests: u64,
    pub exception_responses: u64,
    pub malformed_frames: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    connections: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
    requests: AtomicU64,
    exceptions: AtomicU64,
    malformed: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self, uptime_seconds: u64) -> ServerStats {
        ServerStats {
            connections_count: self.connections.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
            total_requests: self.requests.load(Ordering::Relaxed),
            exception_responses: self.exceptions.load(Ordering::Relaxed),
            malformed_frames: self.malformed.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }
}

/// Modbus TCP server configuration
#[derive(Debug, Clone)]
pub struct ModbusTcpServerConfig {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    /// Connections silent for this long, or whose writes stall this long, are closed
    pub idle_timeout: Duration,
    /// Input register refresh, if any
    pub refresh: Option<RefresherConfig>,
}

impl Default for ModbusTcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 5020)),
            max_connections: 100,
            idle_timeout: Duration::from_secs(60),
            refresh: Some(RefresherConfig::default()),
        }
    }
}

/// Per-connection context shared by the accept loop
#[derive(Clone)]
struct ConnectionContext {
    dispatcher: RequestDispatcher,
    stats: Arc<StatsCounters>,
    events: EventLogger,
    shutdown: CancellationToken,
    idle_timeout: Duration,
}

/// Modbus TCP server implementation
pub struct ModbusTcpServer {
    config: ModbusTcpServerConfig,
    table: Arc<SlaveTable>,
    events: EventLogger,
    refresher_seed: Option<u64>,
    stats: Arc<StatsCounters>,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    refresher_task: Option<JoinHandle<u64>>,
    local_addr: Option<SocketAddr>,
    start_time: Option<Instant>,
}

impl ModbusTcpServer {
    /// Create a server with default configuration bound to `bind_address`
    pub fn new(bind_address: &str, table: Arc<SlaveTable>) -> ModbusResult<Self> {
        let addr = bind_address
            .parse()
            .map_err(|e| ModbusError::configuration(format!("Invalid bind address: {}", e)))?;

        let config = ModbusTcpServerConfig {
            bind_address: addr,
            ..Default::default()
        };

        Self::with_config(config, table)
    }

    /// Create a server with custom configuration
    pub fn with_config(config: ModbusTcpServerConfig, table: Arc<SlaveTable>) -> ModbusResult<Self> {
        if config.max_connections == 0 {
            return Err(ModbusError::configuration("max_connections must be at least 1"));
        }
        if let Some(refresh) = &config.refresh {
            refresh.validate()?;
        }

        Ok(Self {
            config,
            table,
            events: EventLogger::log_facade(),
            refresher_seed: None,
            stats: Arc::new(StatsCounters::default()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            accept_task: None,
            refresher_task: None,
            local_addr: None,
            start_time: None,
        })
    }

    /// Route server events to `events`
    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = events;
        self
    }

    /// Seed the refresher's random generator
    pub fn with_refresher_seed(mut self, seed: u64) -> Self {
        self.refresher_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &ModbusTcpServerConfig {
        &self.config
    }

    /// Accept until shutdown, then wait for every connection task to end
    async fn accept_loop(
        listener: TcpListener,
        limit: Arc<Semaphore>,
        ctx: ConnectionContext,
        running: Arc<AtomicBool>,
    ) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match limit.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting {}", peer);
                                    ctx.stats.rejected.fetch_add(1, Ordering::Relaxed);
                                    drop(stream);
                                    continue;
                                }
                            };

                            connections.spawn(Self::handle_client(stream, peer, ctx.clone(), permit));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        drop(listener);
        debug!("Waiting for {} connection(s) to close", connections.len());
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!("Connection task failed: {}", e);
            }
        }

        running.store(false, Ordering::SeqCst);
    }

    /// Serve one connection until it closes
    async fn handle_client(stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext, _permit: OwnedSemaphorePermit) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }

        ctx.stats.connections.fetch_add(1, Ordering::Relaxed);
        ctx.stats.active.fetch_add(1, Ordering::Relaxed);
        ctx.events.emit(ServerEvent::ConnectionOpened { peer });

        let mut framed = Framed::new(stream, ServerCodec);

        let reason = loop {
            let next = tokio::select! {
                _ = ctx.shutdown.cancelled() => break "server shutdown".to_string(),
                next = timeout(ctx.idle_timeout, framed.next()) => next,
            };

            let adu = match next {
                Err(_) => break format!("idle for {:?}", ctx.idle_timeout),
                Ok(None) => break "peer closed".to_string(),
                Ok(Some(Err(e))) => {
                    if e.is_protocol_error() {
                        ctx.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    }
                    break e.to_string();
                }
                Ok(Some(Ok(adu))) => adu,
            };

            ctx.stats.requests.fetch_add(1, Ordering::Relaxed);
            ctx.events.emit(ServerEvent::FrameDecoded {
                peer,
                transaction_id: adu.header.transaction_id,
                unit_id: adu.header.unit_id,
                function: adu.function_code(),
            });

            let response = ctx.dispatcher.dispatch(adu);
            if response.pdu.is_err() {
                ctx.stats.exceptions.fetch_add(1, Ordering::Relaxed);
            }

            // Writes end on shutdown or after the idle timeout
            let sent = tokio::select! {
                _ = ctx.shutdown.cancelled() => break "server shutdown".to_string(),
                sent = timeout(ctx.idle_timeout, framed.send(response)) => sent,
            };
            match sent {
                Err(_) => break format!("write stalled for {:?}", ctx.idle_timeout),
                Ok(Err(e)) => break format!("write failed: {}", e),
                Ok(Ok(())) => {}
            }
        };

        ctx.stats.active.fetch_sub(1, Ordering::Relaxed);
        ctx.events.emit(ServerEvent::ConnectionClosed { peer, reason });
    }
}

#[async_trait]
impl ModbusServer for ModbusTcpServer {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::protocol("Server is already running"));
        }

        info!("Starting Modbus TCP server on {}", self.config.bind_address);

        let listener = TcpListener::bind(self.config.bind_address).await.map_err(|e| {
            ModbusError::connection(format!("Failed to bind to {}: {}", self.config.bind_address, e))
        })?;
        let local_addr = listener.local_addr()?;

        self.shutdown = CancellationToken::new();
        self.local_addr = Some(local_addr);
        self.start_time = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);

        info!("Modbus TCP server listening on {}", local_addr);
        info!("   - Max connections: {}", self.config.max_connections);
        info!("   - Idle timeout: {:?}", self.config.idle_timeout);
        match self.table.slave_ids().as_slice() {
            [] => info!("   - Slaves: any unit id"),
            ids => info!("   - Slaves: {:?} ({} store(s))", ids, self.table.stores().len()),
        }

        if let Some(refresh) = self.config.refresh.clone() {
            let mut refresher = PeriodicRefresher::new(&self.table, refresh)?.with_events(self.events.clone());
            if let Some(seed) = self.refresher_seed {
                refresher = refresher.with_seed(seed);
            }
            self.refresher_task = Some(refresher.spawn(self.shutdown.clone()));
        }

        let ctx = ConnectionContext {
            dispatcher: RequestDispatcher::new(self.table.clone()).with_events(self.events.clone()),
            stats: self.stats.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
            idle_timeout: self.config.idle_timeout,
        };
        let limit = Arc::new(Semaphore::new(self.config.max_connections));

        self.accept_task = Some(tokio::spawn(Self::accept_loop(
            listener,
            limit,
            ctx,
            self.running.clone(),
        )));

        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        self.shutdown.cancel();

        if let Some(task) = self.accept_task.take() {
            task.await
                .map_err(|e| ModbusError::internal(format!("Accept task failed: {}", e)))?;
        }
        if let Some(task) = self.refresher_task.take() {
            let ticks = task
                .await
                .map_err(|e| ModbusError::internal(format!("Refresher task failed: {}", e)))?;
            debug!("Refresher performed {} ticks", ticks);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Modbus TCP server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn get_stats(&self) -> ServerStats {
        let uptime = self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);
        self.stats.snapshot(uptime)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}
