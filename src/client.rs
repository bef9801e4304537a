//! One logical Modbus operation, one request/response exchange.
//!
//! [`RtuClient`] couples the frame codec with a [`Transport`]. It never retries:
//! every failure comes back to the caller with its specific kind.

use fugit::MillisDurationU32;
use log::debug;

use crate::{
    error::{PsuError, Result},
    frame::{self, FunctionCode, MAX_READ_REGISTERS, ParsedResponse, Registers},
    transport::{Connector, SerialConfig, Transport},
};

pub struct RtuClient<C: Connector> {
    transport: Transport<C>,
    slave: u8,
    timeout: MillisDurationU32,
}

impl<C: Connector> RtuClient<C> {
    /// Create a client talking to the slave and timeout given in `config`.
    pub fn new(connector: C, config: SerialConfig) -> Self {
        Self {
            slave: config.slave_address,
            timeout: config.response_timeout,
            transport: Transport::new(connector, config),
        }
    }

    pub fn transport_mut(&mut self) -> &mut Transport<C> {
        &mut self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    fn exchange(&mut self, request: &[u8]) -> Result<frame::Frame> {
        if !self.transport.is_open() {
            return Err(PsuError::NotConnected);
        }
        Ok(self.transport.transact(request, self.timeout)?)
    }

    /// Read `count` consecutive holding registers starting at `start`.
    pub fn read_registers(&mut self, start: u16, count: u16) -> Result<Registers> {
        if count == 0 || count as usize > MAX_READ_REGISTERS {
            return Err(PsuError::OutOfRange {
                quantity: "register count",
                value: count as f64,
                min: 1.0,
                max: MAX_READ_REGISTERS as f64,
            });
        }
        let request = frame::encode_read_holding_registers(self.slave, start, count);
        let response = self.exchange(&request)?;

        match self.check_reply(&response, FunctionCode::ReadHoldingRegisters)? {
            ParsedResponse::ReadHoldingRegisters { values, .. } => {
                if values.len() != count as usize {
                    return Err(PsuError::MalformedFrame {
                        len: response.len(),
                        reason: "register count differs from request",
                    });
                }
                Ok(values)
            }
            _ => Err(PsuError::MalformedFrame {
                len: response.len(),
                reason: "unexpected reply to read",
            }),
        }
    }

    /// Read one holding register.
    pub fn read_register(&mut self, address: u16) -> Result<u16> {
        let values = self.read_registers(address, 1)?;
        Ok(values[0])
    }

    /// Write one holding register and confirm the device echoed it back unchanged.
    pub fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let request = frame::encode_write_single_register(self.slave, address, value);
        let response = self.exchange(&request)?;

        match self.check_reply(&response, FunctionCode::WriteSingleRegister)? {
            ParsedResponse::WriteSingleRegister {
                address: echoed_address,
                value: echoed,
                ..
            } => {
                if echoed_address != address || echoed != value {
                    return Err(PsuError::WriteVerificationFailed {
                        address,
                        expected: value,
                        echoed_address,
                        echoed,
                    });
                }
                debug!("wrote {address:#06X} = {value:#06X}");
                Ok(())
            }
            _ => Err(PsuError::MalformedFrame {
                len: response.len(),
                reason: "unexpected reply to write",
            }),
        }
    }

    /// Send arbitrary bytes and return the raw reply once its CRC checks out.
    pub fn send_raw(&mut self, request: &[u8]) -> Result<frame::Frame> {
        let response = self.exchange(request)?;
        frame::check_crc(&response)?;
        Ok(response)
    }

    /// Decode `response` and make sure it answers our request.
    fn check_reply(&self, response: &[u8], function: FunctionCode) -> Result<ParsedResponse> {
        let parsed = frame::decode_response(response)?;
        if parsed.slave() != self.slave {
            return Err(PsuError::MalformedFrame {
                len: response.len(),
                reason: "reply from unexpected slave",
            });
        }
        if let ParsedResponse::Exception { function, code, .. } = parsed {
            return Err(PsuError::DeviceException {
                function: function & 0x7F,
                code,
            });
        }
        if parsed.function() != u8::from(function) {
            return Err(PsuError::MalformedFrame {
                len: response.len(),
                reason: "reply function differs from request",
            });
        }
        Ok(parsed)
    }
}
