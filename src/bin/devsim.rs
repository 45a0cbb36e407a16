/// Modbus TCP device simulator
///
/// Serves holding and input register reads for a set of slave ids while a
/// background task keeps refreshing the input registers with random values.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, ValueEnum};
use log::{error, info};
use tokio::signal;

use modbus_devsim::utils::{format, logging};
use modbus_devsim::{
    BankKind, DevsimConfig, ModbusResult, ModbusServer, ModbusTcpServer, SlaveMode,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Single,
    Shared,
    Isolated,
}

impl From<ModeArg> for SlaveMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => SlaveMode::Single,
            ModeArg::Shared => SlaveMode::Shared,
            ModeArg::Isolated => SlaveMode::Isolated,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "devsim", version, about = "Modbus TCP device simulator")]
struct Args {
    /// JSON configuration file; command line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Comma separated slave ids
    #[arg(short, long, value_delimiter = ',')]
    slaves: Option<Vec<u8>>,

    /// How slave ids map to register stores
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Input register refresh period in milliseconds
    #[arg(short = 'i', long)]
    interval_ms: Option<u64>,

    /// Do not refresh input registers
    #[arg(long)]
    no_refresh: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> ModbusResult<DevsimConfig> {
        let mut config = match &self.config {
            Some(path) => DevsimConfig::from_file(path)?,
            None => DevsimConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(ids) = self.slaves {
            config.slaves.ids = ids;
        }
        if let Some(mode) = self.mode {
            config.slaves.mode = mode.into();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.refresh.interval_ms = interval_ms;
        }
        if self.no_refresh {
            config.refresh.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ModbusResult<()> {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    let config = args.into_config()?;
    info!("{}", modbus_devsim::info());

    let table = Arc::new(config.slaves.build_table());
    let mut server = ModbusTcpServer::with_config(config.server_config(), table.clone())?;
    server.start().await?;

    match signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt signal, stopping server..."),
        Err(err) => error!("Failed to listen for interrupt signal: {}", err),
    }

    server.stop().await?;

    let stats = server.get_stats();
    info!("Final server statistics:");
    info!("   Total connections: {}", stats.connections_count);
    info!("   Rejected connections: {}", stats.rejected_connections);
    info!("   Total requests: {}", stats.total_requests);
    info!("   Exception responses: {}", stats.exception_responses);
    info!("   Malformed frames: {}", stats.malformed_frames);
    info!("   Uptime: {}", format::format_duration(Duration::from_secs(stats.uptime_seconds)));

    for (index, store) in table.stores().iter().enumerate() {
        let len = store.len(BankKind::InputRegisters).min(u16::MAX as usize) as u16;
        if let Ok(values) = store.read(BankKind::InputRegisters, 0, len) {
            info!("   Store {} input registers: {}", index, format::registers_to_hex(&values));
        }
    }

    Ok(())
}
