/// Modbus TCP polling client
///
/// A master-side client for the read function codes. It frames requests with
/// the same codec the server uses and checks every response against the
/// request it answers before handing values back.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::codec::{ClientCodec, MBAP_HEADER_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{Header, ModbusFunction, Request, RequestAdu, Response, SlaveId, TransactionId};

/// Trait defining the interface for Modbus client operations
#[async_trait]
pub trait ModbusClient: Send + Sync {
    /// Read coils (function code 0x01)
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02)
    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read holding registers (function code 0x03)
    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Read input registers (function code 0x04)
    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Check if client is connected
    fn is_connected(&self) -> bool;

    /// Close the client connection
    async fn close(&mut self) -> ModbusResult<()>;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Modbus data tables a poller can read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Coils,
    DiscreteInputs,
    InputRegisters,
    HoldingRegisters,
}

impl DataType {
    /// Map the 1-based type number used on the command line
    pub fn from_index(index: u8) -> ModbusResult<Self> {
        match index {
            1 => Ok(DataType::Coils),
            2 => Ok(DataType::DiscreteInputs),
            3 => Ok(DataType::InputRegisters),
            4 => Ok(DataType::HoldingRegisters),
            _ => Err(ModbusError::configuration(format!("Invalid data type {}", index))),
        }
    }

    pub fn function(self) -> ModbusFunction {
        match self {
            DataType::Coils => ModbusFunction::ReadCoils,
            DataType::DiscreteInputs => ModbusFunction::ReadDiscreteInputs,
            DataType::InputRegisters => ModbusFunction::ReadInputRegisters,
            DataType::HoldingRegisters => ModbusFunction::ReadHoldingRegisters,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Coils => "Coils",
            DataType::DiscreteInputs => "Discrete input",
            DataType::InputRegisters => "16-bit input register",
            DataType::HoldingRegisters => "16-bit holding register",
        };
        f.write_str(name)
    }
}

/// Read `quantity` values of `data_type` and widen them to `u16` for display
pub async fn poll_once<C: ModbusClient + ?Sized>(
    client: &mut C,
    slave_id: SlaveId,
    data_type: DataType,
    address: u16,
    quantity: u16,
) -> ModbusResult<Vec<u16>> {
    let bits_to_values = |bits: Vec<bool>| -> Vec<u16> { bits.into_iter().map(u16::from).collect() };
    match data_type {
        DataType::Coils => client.read_01(slave_id, address, quantity).await.map(bits_to_values),
        DataType::DiscreteInputs => client.read_02(slave_id, address, quantity).await.map(bits_to_values),
        DataType::InputRegisters => client.read_04(slave_id, address, quantity).await,
        DataType::HoldingRegisters => client.read_03(slave_id, address, quantity).await,
    }
}

/// Modbus TCP client
pub struct ModbusTcpClient {
    framed: Option<Framed<TcpStream, ClientCodec>>,
    address: SocketAddr,
    timeout: Duration,
    next_transaction_id: TransactionId,
    stats: TransportStats,
}

impl ModbusTcpClient {
    /// Connect to `address` ("host:port")
    pub async fn from_address(address: &str, timeout_duration: Duration) -> ModbusResult<Self> {
        let addr: SocketAddr = match address.parse() {
            Ok(addr) => addr,
            Err(_) => tokio::net::lookup_host(address)
                .await
                .map_err(|e| ModbusError::connection(format!("Cannot resolve {}: {}", address, e)))?
                .next()
                .ok_or_else(|| ModbusError::connection(format!("No address found for {}", address)))?,
        };
        Self::connect(addr, timeout_duration).await
    }

    /// Connect to a socket address
    pub async fn connect(address: SocketAddr, timeout_duration: Duration) -> ModbusResult<Self> {
        let stream = timeout(timeout_duration, TcpStream::connect(address))
            .await
            .map_err(|_| ModbusError::timeout("connect", timeout_duration.as_millis() as u64))?
            .map_err(|e| ModbusError::connection(format!("Connection to {} failed: {}", address, e)))?;
        stream.set_nodelay(true)?;

        debug!("Connected to Modbus TCP server {}", address);
        Ok(Self {
            framed: Some(Framed::new(stream, ClientCodec)),
            address,
            timeout: timeout_duration,
            next_transaction_id: 1,
            stats: TransportStats::default(),
        })
    }

    fn next_transaction_id(&mut self) -> TransactionId {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Send one request and wait for the matching response
    pub async fn execute(&mut self, slave_id: SlaveId, request: Request) -> ModbusResult<Response> {
        request.validate()?;
        let header = Header {
            transaction_id: self.next_transaction_id(),
            unit_id: slave_id,
        };

        let result = self.round_trip(header, request).await;
        match &result {
            Ok(_) => self.stats.responses_received += 1,
            Err(ModbusError::Timeout { .. }) => self.stats.timeouts += 1,
            Err(_) => self.stats.errors += 1,
        }
        if let Err(e) = &result {
            // After a transport or framing error the stream may be out of sync
            if e.is_transport_error() || e.is_fatal_to_connection() {
                self.framed = None;
            }
        }
        result
    }

    async fn round_trip(&mut self, header: Header, request: Request) -> ModbusResult<Response> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Client is not connected"))?;

        let adu = RequestAdu { header, pdu: Ok(request) };
        timeout(self.timeout, framed.send(adu))
            .await
            .map_err(|_| ModbusError::timeout("send", timeout_ms))??;
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += (MBAP_HEADER_SIZE + request.pdu_len()) as u64;

        let response = timeout(self.timeout, framed.next())
            .await
            .map_err(|_| ModbusError::timeout("receive", timeout_ms))?
            .ok_or_else(|| ModbusError::connection("Connection closed by server"))??;

        let pdu_len = match &response.pdu {
            Ok(response) => response.pdu_len(),
            Err(exception) => exception.pdu_len(),
        };
        self.stats.bytes_received += (MBAP_HEADER_SIZE + pdu_len) as u64;

        if response.header != header {
            return Err(ModbusError::protocol(format!(
                "Response header mismatch: expected TID={} unit={}, got TID={} unit={}",
                header.transaction_id, header.unit_id, response.header.transaction_id, response.header.unit_id
            )));
        }

        let response = response.pdu.map_err(|exception| exception.into_error())?;
        if response.function() != request.function {
            return Err(ModbusError::protocol(format!(
                "Function mismatch: expected {}, got {}",
                request.function,
                response.function()
            )));
        }

        Ok(response)
    }

    async fn read_bits(&mut self, slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        match self.execute(slave_id, Request::new(function, address, quantity)).await? {
            Response::ReadCoils(mut bits) | Response::ReadDiscreteInputs(mut bits) => {
                if bits.len() < quantity as usize {
                    return Err(ModbusError::protocol(format!(
                        "Expected {} bits, got {}",
                        quantity,
                        bits.len()
                    )));
                }
                bits.truncate(quantity as usize);
                Ok(bits)
            }
            other => Err(ModbusError::protocol(format!("Unexpected response for {}", other.function()))),
        }
    }

    async fn read_registers(&mut self, slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        match self.execute(slave_id, Request::new(function, address, quantity)).await? {
            Response::ReadHoldingRegisters(registers) | Response::ReadInputRegisters(registers) => {
                if registers.len() != quantity as usize {
                    return Err(ModbusError::protocol(format!(
                        "Expected {} registers, got {}",
                        quantity,
                        registers.len()
                    )));
                }
                Ok(registers)
            }
            other => Err(ModbusError::protocol(format!("Unexpected response for {}", other.function()))),
        }
    }
}

#[async_trait]
impl ModbusClient for ModbusTcpClient {
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadCoils, address, quantity).await
    }

    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadDiscreteInputs, address, quantity).await
    }

    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, ModbusFunction::ReadHoldingRegisters, address, quantity).await
    }

    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, ModbusFunction::ReadInputRegisters, address, quantity).await
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut framed) = self.framed.take() {
            SinkExt::<RequestAdu>::close(&mut framed).await?;
            debug!("Disconnected from {}", self.address);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
