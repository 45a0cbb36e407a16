/// Request dispatch
///
/// Turns one decoded request ADU into exactly one response ADU. The dispatcher
/// holds no per-call state; it only resolves the unit id against the slave
/// table and reads from the resolved store.

use std::sync::Arc;
use log::debug;

use crate::error::{ModbusError, ModbusResult};
use crate::logging::{EventLogger, ServerEvent};
use crate::protocol::{
    ExceptionResponse, ModbusFunction, Request, RequestAdu, Response, ResponseAdu, ResponsePdu,
};
use crate::register_bank::{BankKind, RegisterStore};
use crate::slave_table::SlaveTable;

/// Maps request ADUs to response ADUs
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    table: Arc<SlaveTable>,
    events: EventLogger,
}

impl RequestDispatcher {
    pub fn new(table: Arc<SlaveTable>) -> Self {
        Self {
            table,
            events: EventLogger::log_facade(),
        }
    }

    /// Report exception responses to `events`
    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = events;
        self
    }

    /// Answer one request
    ///
    /// The response always echoes the request's transaction id and unit id.
    pub fn dispatch(&self, adu: RequestAdu) -> ResponseAdu {
        let function = adu.function_code();
        let RequestAdu { header, pdu } = adu;

        let pdu: ResponsePdu = match self.table.get(header.unit_id) {
            Err(error) => Err(Self::reject(function, &error)),
            Ok(store) => match pdu {
                Err(exception) => Err(exception),
                Ok(request) => Self::serve(&store, request)
                    .map_err(|error| Self::reject(request.function.to_u8(), &error)),
            },
        };

        if let Err(exception) = &pdu {
            self.events.emit(ServerEvent::ExceptionRaised {
                transaction_id: header.transaction_id,
                unit_id: header.unit_id,
                function: exception.function,
                exception: exception.exception,
            });
        }

        ResponseAdu { header, pdu }
    }

    fn serve(store: &RegisterStore, request: Request) -> ModbusResult<Response> {
        match request.function {
            ModbusFunction::ReadHoldingRegisters => {
                Self::read_registers(store, BankKind::HoldingRegisters, request)
                    .map(Response::ReadHoldingRegisters)
            }
            ModbusFunction::ReadInputRegisters => {
                Self::read_registers(store, BankKind::InputRegisters, request)
                    .map(Response::ReadInputRegisters)
            }
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                Err(ModbusError::invalid_function(request.function.to_u8()))
            }
        }
    }

    fn read_registers(store: &RegisterStore, kind: BankKind, request: Request) -> ModbusResult<Vec<u16>> {
        request.validate()?;
        debug!(
            "Reading {} {} from address {}",
            request.quantity, kind, request.address
        );
        store.read(kind, request.address, request.quantity)
    }

    fn reject(function: u8, error: &ModbusError) -> ExceptionResponse {
        ExceptionResponse::new(function, error.to_exception())
    }
}
