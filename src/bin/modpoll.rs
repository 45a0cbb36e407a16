/// Modbus polling master
///
/// Connects to a slave and reads the same block of data at a fixed rate,
/// printing one `[reference]: value` line per value until interrupted.

use std::time::Duration;
use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

use modbus_devsim::utils::{format, logging, validation};
use modbus_devsim::{poll_once, DataType, ModbusClient, ModbusResult, ModbusTcpClient, DEFAULT_TCP_PORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Tcp,
    Udp,
    Rtu,
    Ascii,
}

#[derive(Debug, Parser)]
#[command(name = "modpoll", version, about = "Modbus polling master")]
struct Args {
    /// Communication mode (only tcp is supported)
    #[arg(short = 'm', value_enum, default_value = "tcp")]
    mode: Mode,

    /// Slave address (1-247)
    #[arg(short = 'a', default_value_t = 1)]
    slave: u8,

    /// Start data reference (1-65536)
    #[arg(short = 'r', default_value_t = 100)]
    reference: u32,

    /// Number of data values to read (1-125)
    #[arg(short = 'c', default_value_t = 1)]
    count: u16,

    /// Data type: 1 coils, 2 discrete inputs, 3 input registers, 4 holding registers
    #[arg(short = 't', default_value_t = 3)]
    data_type: u8,

    /// TCP port number
    #[arg(short = 'p', default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    /// Poll rate in milliseconds
    #[arg(short = 'R', default_value_t = 1000)]
    poll_rate: u64,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Slave host
    host: String,
}

#[tokio::main]
async fn main() -> ModbusResult<()> {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    if args.mode != Mode::Tcp {
        eprintln!("{} mode is not yet supported.", format!("{:?}", args.mode).to_uppercase());
        return Ok(());
    }

    validation::validate_slave_id(args.slave)?;
    validation::validate_register_count(args.count)?;
    let address = validation::reference_to_address(args.reference)?;
    let data_type = DataType::from_index(args.data_type)?;
    let poll_rate = Duration::from_millis(args.poll_rate.max(1));

    let target = format!("{}:{}", args.host, args.port);
    let timeout = Duration::from_millis(modbus_devsim::DEFAULT_TIMEOUT_MS);
    let mut client = ModbusTcpClient::from_address(&target, timeout).await?;

    println!("Connection:     TCP");
    println!(
        "Slave:          address = {}, start reference = {}, count = {}",
        args.slave, args.reference, args.count
    );
    println!(
        "Communication:  {}, port {}, poll rate {}",
        args.host,
        args.port,
        format::format_duration(poll_rate)
    );
    println!("Data Type:      {}", data_type);
    println!("Polling slave... (Ctrl-C to stop)");

    let mut ticker = interval(poll_rate);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Caught interrupt, stopping");
                break Ok(());
            }
            _ = ticker.tick() => {
                match poll_once(&mut client, args.slave, data_type, address, args.count).await {
                    Ok(values) => {
                        println!();
                        for line in format::poll_lines(args.reference, &values) {
                            println!("{}", line);
                        }
                    }
                    Err(e) => {
                        error!("{}", e);
                        break Err(e);
                    }
                }
            }
        }
    };

    let stats = client.get_stats();
    debug!(
        "Requests: {}, responses: {}, errors: {}, timeouts: {}",
        stats.requests_sent, stats.responses_received, stats.errors, stats.timeouts
    );
    client.close().await?;
    result
}
