//! # Modbus TCP Framing
//!
//! MBAP framing for both directions of a Modbus/TCP connection, implemented
//! as `tokio_util` codecs so a `Framed<TcpStream, _>` does the buffering.
//!
//! ```text
//! ┌────────────────┬─────────────┬──────────┬─────────┬──────────────────┐
//! │ transaction id │ protocol id │  length  │ unit id │       PDU        │
//! │    2 bytes     │   2 bytes   │ 2 bytes  │ 1 byte  │ fc + payload     │
//! └────────────────┴─────────────┴──────────┴─────────┴──────────────────┘
//!                                  └── counts unit id + PDU ──┘
//! ```
//!
//! Decoding follows the `Decoder` contract:
//! - `Ok(None)`: not enough bytes for the declared length yet, read more
//! - `Err(ModbusError::Frame)`: the stream is out of sync, close it
//! - `Ok(Some(adu))`: one complete frame was consumed from the buffer
//!
//! A frame whose PDU cannot be served (unknown function code, truncated
//! payload) is still a valid frame; it decodes to an exception PDU.

use bytes::{Buf, BufMut, BytesMut};
use log::debug;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{Header, Request, RequestAdu, RequestPdu, Response, ResponseAdu, ResponsePdu};
use crate::utils::format::bytes_to_hex;

/// MBAP header size including the unit identifier
pub const MBAP_HEADER_SIZE: usize = 7;

/// Bytes preceding the field the length counts from (transaction id, protocol id, length)
const LENGTH_PREFIX_SIZE: usize = 6;

/// Modbus protocol identifier
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Largest valid length field: unit id + 253 bytes of PDU
pub const MAX_LENGTH_FIELD: usize = 254;

/// Smallest valid length field: unit id + function code
const MIN_LENGTH_FIELD: usize = 2;

/// Split one complete frame off `src`
///
/// Returns the header and the PDU bytes.
fn split_frame(src: &mut BytesMut) -> ModbusResult<Option<(Header, BytesMut)>> {
    if src.len() < MBAP_HEADER_SIZE {
        return Ok(None);
    }

    let transaction_id = u16::from_be_bytes([src[0], src[1]]);
    let protocol_id = u16::from_be_bytes([src[2], src[3]]);
    let length = u16::from_be_bytes([src[4], src[5]]) as usize;
    let unit_id = src[6];

    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(ModbusError::frame(format!(
            "Invalid protocol id 0x{:04X} (transaction {})",
            protocol_id, transaction_id
        )));
    }

    if !(MIN_LENGTH_FIELD..=MAX_LENGTH_FIELD).contains(&length) {
        return Err(ModbusError::frame(format!(
            "Invalid MBAP length {} (transaction {})",
            length, transaction_id
        )));
    }

    let frame_len = LENGTH_PREFIX_SIZE + length;
    if src.len() < frame_len {
        src.reserve(frame_len - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(frame_len);
    debug!("[MODBUS-TCP] recv {}", bytes_to_hex(&frame));
    frame.advance(MBAP_HEADER_SIZE);

    let header = Header { transaction_id, unit_id };
    Ok(Some((header, frame)))
}

/// Write the MBAP header for a PDU of `pdu_len` bytes
fn put_header(dst: &mut BytesMut, header: Header, pdu_len: usize) -> ModbusResult<()> {
    let length = pdu_len + 1;
    if length > MAX_LENGTH_FIELD {
        return Err(ModbusError::frame(format!("PDU of {} bytes does not fit a frame", pdu_len)));
    }

    dst.reserve(LENGTH_PREFIX_SIZE + length);
    dst.put_u16(header.transaction_id);
    dst.put_u16(MODBUS_PROTOCOL_ID);
    dst.put_u16(length as u16);
    dst.put_u8(header.unit_id);
    Ok(())
}

/// Server side codec: decodes requests, encodes responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = ModbusError;

    fn decode(&mut self, src: &mut BytesMut) -> ModbusResult<Option<RequestAdu>> {
        let Some((header, pdu)) = split_frame(src)? else {
            return Ok(None);
        };

        Ok(Some(RequestAdu {
            header,
            pdu: Request::decode(&pdu),
        }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = ModbusError;

    fn encode(&mut self, adu: ResponseAdu, dst: &mut BytesMut) -> ModbusResult<()> {
        let start = dst.len();
        match &adu.pdu {
            Ok(response) => {
                put_header(dst, adu.header, response.pdu_len())?;
                response.encode(dst);
            }
            Err(exception) => {
                put_header(dst, adu.header, exception.pdu_len())?;
                exception.encode(dst);
            }
        }
        debug!("[MODBUS-TCP] send {}", bytes_to_hex(&dst[start..]));
        Ok(())
    }
}

/// Client side codec: encodes requests, decodes responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = ModbusError;

    fn decode(&mut self, src: &mut BytesMut) -> ModbusResult<Option<ResponseAdu>> {
        let Some((header, pdu)) = split_frame(src)? else {
            return Ok(None);
        };

        let pdu: ResponsePdu = Response::decode(&pdu)?;
        Ok(Some(ResponseAdu { header, pdu }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = ModbusError;

    fn encode(&mut self, adu: RequestAdu, dst: &mut BytesMut) -> ModbusResult<()> {
        let request = match adu.pdu {
            Ok(request) => request,
            Err(exception) => {
                return Err(ModbusError::protocol(format!(
                    "Cannot send exception PDU for function 0x{:02X} as a request",
                    exception.function
                )))
            }
        };

        put_header(dst, adu.header, request.pdu_len())?;
        request.encode(dst);
        Ok(())
    }
}

/// Encode a request PDU into a standalone frame
pub fn encode_request(header: Header, pdu: RequestPdu) -> ModbusResult<BytesMut> {
    let mut buf = BytesMut::new();
    ClientCodec.encode(RequestAdu { header, pdu }, &mut buf)?;
    Ok(buf)
}

/// Encode a response PDU into a standalone frame
pub fn encode_response(header: Header, pdu: ResponsePdu) -> ModbusResult<BytesMut> {
    let mut buf = BytesMut::new();
    ServerCodec.encode(ResponseAdu { header, pdu }, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ExceptionResponse, ModbusException, ModbusFunction};

    fn header(transaction_id: u16, unit_id: u8) -> Header {
        Header { transaction_id, unit_id }
    }

    #[test]
    fn test_decode_read_holding_registers() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A][..]);
        let adu = ServerCodec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(adu.header, header(1, 1));
        assert_eq!(adu.pdu, Ok(Request::new(ModbusFunction::ReadHoldingRegisters, 0, 10)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let full = [0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x02, 0x04, 0x00, 0x00, 0x00, 0x02];

        // Header alone, then all but the last byte
        for cut in [3, MBAP_HEADER_SIZE, full.len() - 1] {
            let mut buf = BytesMut::from(&full[..cut]);
            assert!(ServerCodec.decode(&mut buf).unwrap().is_none());
            assert_eq!(buf.len(), cut);
        }

        let mut buf = BytesMut::from(&full[..]);
        assert!(ServerCodec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_malformed_frames() {
        // Protocol id 1
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01][..]);
        assert!(matches!(ServerCodec.decode(&mut buf), Err(ModbusError::Frame { .. })));

        // Length field too small to hold a function code
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01][..]);
        assert!(matches!(ServerCodec.decode(&mut buf), Err(ModbusError::Frame { .. })));

        // Length field larger than any Modbus PDU
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01][..]);
        assert!(matches!(ServerCodec.decode(&mut buf), Err(ModbusError::Frame { .. })));
    }

    #[test]
    fn test_decode_pipelined_frames() {
        let mut buf = BytesMut::new();
        for transaction_id in 1..=3u16 {
            let request = Request::new(ModbusFunction::ReadInputRegisters, transaction_id, 1);
            buf.extend_from_slice(&encode_request(header(transaction_id, 1), Ok(request)).unwrap());
        }

        for transaction_id in 1..=3u16 {
            let adu = ServerCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(adu.header.transaction_id, transaction_id);
            assert_eq!(adu.pdu.unwrap().address, transaction_id);
        }
        assert!(ServerCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_unsupported_function_is_not_malformed() {
        // Write single register (0x06)
        let mut buf = BytesMut::from(&[0x00, 0x09, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03][..]);
        let adu = ServerCodec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(adu.pdu, Err(ExceptionResponse::new(0x06, ModbusException::IllegalFunction)));
    }

    #[test]
    fn test_encode_response_frame() {
        let frame = encode_response(header(0x1234, 2), Ok(Response::ReadInputRegisters(vec![5, 130]))).unwrap();

        assert_eq!(
            &frame[..],
            &[0x12, 0x34, 0x00, 0x00, 0x00, 0x07, 0x02, 0x04, 0x04, 0x00, 0x05, 0x00, 0x82]
        );
    }

    #[test]
    fn test_encode_exception_frame() {
        let exception = ExceptionResponse::new(0x03, ModbusException::GatewayTargetDeviceFailedToRespond);
        let frame = encode_response(header(9, 4), Err(exception)).unwrap();

        assert_eq!(&frame[..], &[0x00, 0x09, 0x00, 0x00, 0x00, 0x03, 0x04, 0x83, 0x0B]);
    }

    #[test]
    fn test_request_frame_round_trip() {
        let adu = RequestAdu {
            header: header(42, 3),
            pdu: Ok(Request::new(ModbusFunction::ReadHoldingRegisters, 7, 3)),
        };

        let mut buf = BytesMut::new();
        ClientCodec.encode(adu.clone(), &mut buf).unwrap();
        let encoded = buf.clone();

        let decoded = ServerCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, adu);

        let reencoded = encode_request(decoded.header, decoded.pdu).unwrap();
        assert_eq!(reencoded, encoded);
    }

    #[test]
    fn test_response_frame_round_trip() {
        let adus = [
            ResponseAdu {
                header: header(1, 1),
                pdu: Ok(Response::ReadHoldingRegisters(vec![0, 1, 0xFFFF])),
            },
            ResponseAdu {
                header: header(2, 3),
                pdu: Err(ExceptionResponse::new(0x04, ModbusException::IllegalDataAddress)),
            },
        ];

        for adu in adus {
            let mut buf = encode_response(adu.header, adu.pdu.clone()).unwrap();
            let encoded = buf.clone();

            let decoded = ClientCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, adu);
            assert_eq!(encode_response(decoded.header, decoded.pdu).unwrap(), encoded);
        }
    }

    #[test]
    fn test_client_refuses_exception_request() {
        let exception = ExceptionResponse::new(0x03, ModbusException::IllegalFunction);
        assert!(encode_request(header(1, 1), Err(exception)).is_err());
    }
}
