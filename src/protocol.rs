/// Modbus protocol definitions and data structures
///
/// This module contains the function codes, exception codes and the
/// transport-independent request/response PDUs, together with their byte
/// encodings. MBAP framing lives in [`crate::codec`].

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247)
pub type SlaveId = u8;

/// MBAP transaction identifier
pub type TransactionId = u16;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus function codes understood by the codec
///
/// The server answers only the register reads; coil and discrete input reads
/// are decoded so the dispatcher can reject them explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this function reads single bits
    pub fn is_bit_function(self) -> bool {
        matches!(self, ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs)
    }

    /// Largest quantity a single request may ask for
    pub fn max_quantity(self) -> u16 {
        if self.is_bit_function() {
            crate::MAX_COILS_PER_REQUEST
        } else {
            crate::MAX_REGISTERS_PER_REQUEST
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short name as used in the Modbus application protocol
    pub fn name(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
            ModbusException::ServerDeviceFailure => "Slave Device Failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::ServerDeviceBusy => "Slave Device Busy",
            ModbusException::MemoryParityError => "Memory Parity Error",
            ModbusException::GatewayPathUnavailable => "Gateway Path Unavailable",
            ModbusException::GatewayTargetDeviceFailedToRespond => "Gateway Target Device Failed to Respond",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.name())
    }
}

/// MBAP header fields echoed from a request into its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub unit_id: SlaveId,
}

/// Read request PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
}

/// Exception response PDU
///
/// `function` is the raw code of the rejected request without the exception
/// flag, so unknown function codes can be echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: u8,
    pub exception: ModbusException,
}

/// Normal response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
}

/// A request PDU as seen by the server: either a decodable read request or
/// the exception it has to be answered with
pub type RequestPdu = Result<Request, ExceptionResponse>;

/// A response PDU as seen by the client
pub type ResponsePdu = Result<Response, ExceptionResponse>;

/// Request application data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu {
    pub header: Header,
    pub pdu: RequestPdu,
}

/// Response application data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub header: Header,
    pub pdu: ResponsePdu,
}

impl RequestAdu {
    /// Raw function code of the request, whether or not it decoded
    pub fn function_code(&self) -> u8 {
        match &self.pdu {
            Ok(request) => request.function.to_u8(),
            Err(exception) => exception.function,
        }
    }
}

impl Request {
    /// Create a new read request
    pub fn new(function: ModbusFunction, address: ModbusAddress, quantity: u16) -> Self {
        Self { function, address, quantity }
    }

    /// Validate the quantity against the per-request protocol limit
    pub fn validate(&self) -> ModbusResult<()> {
        let max = self.function.max_quantity();
        if self.quantity == 0 || self.quantity > max {
            return Err(ModbusError::invalid_data(format!(
                "Quantity {} outside 1..={} for {}",
                self.quantity, max, self.function
            )));
        }
        Ok(())
    }

    /// Encoded PDU length (function code + address + quantity)
    pub fn pdu_len(&self) -> usize {
        5
    }

    /// Append the PDU bytes to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.pdu_len());
        dst.put_u8(self.function.to_u8());
        dst.put_u16(self.address);
        dst.put_u16(self.quantity);
    }

    /// Decode a request PDU (function code followed by payload)
    ///
    /// Never fails: PDUs the server cannot serve decode to the exception they
    /// must be answered with.
    pub fn decode(pdu: &[u8]) -> RequestPdu {
        let (&code, payload) = match pdu.split_first() {
            Some(parts) => parts,
            None => return Err(ExceptionResponse::new(0, ModbusException::IllegalFunction)),
        };

        let function = match ModbusFunction::from_u8(code) {
            Ok(function) => function,
            Err(_) => return Err(ExceptionResponse::new(code, ModbusException::IllegalFunction)),
        };

        if payload.len() != 4 {
            return Err(ExceptionResponse::new(code, ModbusException::IllegalDataValue));
        }

        let address = u16::from_be_bytes([payload[0], payload[1]]);
        let quantity = u16::from_be_bytes([payload[2], payload[3]]);
        Ok(Request::new(function, address, quantity))
    }
}

impl ExceptionResponse {
    /// Create a new exception response
    pub fn new(function: u8, exception: ModbusException) -> Self {
        Self {
            function: function & !EXCEPTION_FLAG,
            exception,
        }
    }

    /// Encoded PDU length (flagged function code + exception code)
    pub fn pdu_len(&self) -> usize {
        2
    }

    /// Append the PDU bytes to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.pdu_len());
        dst.put_u8(self.function | EXCEPTION_FLAG);
        dst.put_u8(self.exception.to_u8());
    }

    /// Convert into the error a client reports
    pub fn into_error(self) -> ModbusError {
        ModbusError::exception(self.function, self.exception.to_u8())
    }
}

impl Response {
    /// Function this response answers
    pub fn function(&self) -> ModbusFunction {
        match self {
            Response::ReadCoils(_) => ModbusFunction::ReadCoils,
            Response::ReadDiscreteInputs(_) => ModbusFunction::ReadDiscreteInputs,
            Response::ReadHoldingRegisters(_) => ModbusFunction::ReadHoldingRegisters,
            Response::ReadInputRegisters(_) => ModbusFunction::ReadInputRegisters,
        }
    }

    /// Number of data bytes following the byte count field
    fn byte_count(&self) -> usize {
        match self {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => bits.len().div_ceil(8),
            Response::ReadHoldingRegisters(registers) | Response::ReadInputRegisters(registers) => {
                registers.len() * 2
            }
        }
    }

    /// Encoded PDU length (function code + byte count + data)
    pub fn pdu_len(&self) -> usize {
        2 + self.byte_count()
    }

    /// Append the PDU bytes to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.pdu_len());
        dst.put_u8(self.function().to_u8());
        dst.put_u8(self.byte_count() as u8);
        match self {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                dst.put_slice(&data_utils::pack_bits(bits));
            }
            Response::ReadHoldingRegisters(registers) | Response::ReadInputRegisters(registers) => {
                for &register in registers {
                    dst.put_u16(register);
                }
            }
        }
    }

    /// Decode a response PDU
    ///
    /// Bit responses carry no quantity, so they decode to `8 * byte_count`
    /// bits; callers truncate to the quantity they asked for.
    pub fn decode(pdu: &[u8]) -> ModbusResult<ResponsePdu> {
        let (&code, payload) = pdu
            .split_first()
            .ok_or_else(|| ModbusError::frame("Empty response PDU"))?;

        if code & EXCEPTION_FLAG != 0 {
            if payload.len() != 1 {
                return Err(ModbusError::frame("Invalid exception response length"));
            }
            let exception = ModbusException::from_u8(payload[0]).ok_or_else(|| {
                ModbusError::frame(format!("Unknown exception code 0x{:02X}", payload[0]))
            })?;
            return Ok(Err(ExceptionResponse::new(code, exception)));
        }

        let function = ModbusFunction::from_u8(code)?;
        let (&byte_count, data) = payload
            .split_first()
            .ok_or_else(|| ModbusError::frame("Missing byte count"))?;

        if data.len() != byte_count as usize {
            return Err(ModbusError::frame(format!(
                "Byte count {} does not match {} data bytes",
                byte_count,
                data.len()
            )));
        }

        let response = match function {
            ModbusFunction::ReadCoils => Response::ReadCoils(data_utils::unpack_bits(data, data.len() * 8)),
            ModbusFunction::ReadDiscreteInputs => {
                Response::ReadDiscreteInputs(data_utils::unpack_bits(data, data.len() * 8))
            }
            ModbusFunction::ReadHoldingRegisters => {
                Response::ReadHoldingRegisters(data_utils::bytes_to_registers(data)?)
            }
            ModbusFunction::ReadInputRegisters => {
                Response::ReadInputRegisters(data_utils::bytes_to_registers(data)?)
            }
        };

        Ok(Ok(response))
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::frame("Register data length must be even"));
        }

        Ok(bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Pack boolean values into bytes, LSB first
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        bytes
    }

    /// Unpack bytes into boolean values, LSB first
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| {
                bytes
                    .get(i / 8)
                    .map(|byte| byte & (1 << (i % 8)) != 0)
                    .unwrap_or(false)
            })
            .collect()
    }
}
