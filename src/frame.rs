//! Modbus RTU framing: CRC16, request encoding and response decoding.
//!
//! Nothing in here touches I/O. A frame on the wire looks like
//! `[slave, function, payload.., crc_lo, crc_hi]`.

use core::fmt;

use crate::error::FrameError;

/// Largest RTU frame (ADU) the protocol allows.
pub const MAX_FRAME_LEN: usize = 256;

/// Most registers a single 0x03 request may ask for.
pub const MAX_READ_REGISTERS: usize = 125;

/// Smallest frame we will try to interpret: address, function, one byte, CRC.
pub const MIN_FRAME_LEN: usize = 5;

pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Register values decoded from a read response.
pub type Registers = heapless::Vec<u16, MAX_READ_REGISTERS>;

/// Modbus function codes used by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
}

impl From<FunctionCode> for u8 {
    fn from(value: FunctionCode) -> Self {
        value as u8
    }
}

/// Set on the function code of an exception reply.
const EXCEPTION_BIT: u8 = 0x80;

/// Compute the Modbus CRC16 of `bytes`.
///
/// Initial value 0xFFFF, reflected polynomial 0xA001. The result goes on the
/// wire low byte first.
pub fn compute_crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of everything currently in `frame`.
pub fn append_crc(frame: &mut Frame) -> Result<(), FrameError> {
    let crc = compute_crc16(frame);
    frame
        .extend_from_slice(&crc.to_le_bytes())
        .map_err(|_| FrameError::MalformedFrame {
            len: frame.len(),
            reason: "no room for CRC",
        })
}

fn encode_u16_pair(slave: u8, function: FunctionCode, first: u16, second: u16) -> Frame {
    let [first_hi, first_lo] = first.to_be_bytes();
    let [second_hi, second_lo] = second.to_be_bytes();
    let body = [slave, function.into(), first_hi, first_lo, second_hi, second_lo];
    let [crc_lo, crc_hi] = compute_crc16(&body).to_le_bytes();
    Frame::from_array([
        slave,
        function.into(),
        first_hi,
        first_lo,
        second_hi,
        second_lo,
        crc_lo,
        crc_hi,
    ])
}

/// Build a "read holding registers" (0x03) request.
pub fn encode_read_holding_registers(slave: u8, start: u16, count: u16) -> Frame {
    encode_u16_pair(slave, FunctionCode::ReadHoldingRegisters, start, count)
}

/// Build a "write single register" (0x06) request.
pub fn encode_write_single_register(slave: u8, address: u16, value: u16) -> Frame {
    encode_u16_pair(slave, FunctionCode::WriteSingleRegister, address, value)
}

/// A response frame that passed length and CRC validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    /// Reply to 0x03.
    ReadHoldingRegisters {
        slave: u8,
        byte_count: u8,
        values: Registers,
    },
    /// Echo of a 0x06 request.
    WriteSingleRegister { slave: u8, address: u16, value: u16 },
    /// The slave rejected the request.
    Exception { slave: u8, function: u8, code: u8 },
    /// Any other function code. Only produced for raw pass-through traffic.
    Other {
        slave: u8,
        function: u8,
        payload: heapless::Vec<u8, MAX_FRAME_LEN>,
    },
}

impl ParsedResponse {
    pub fn slave(&self) -> u8 {
        match *self {
            Self::ReadHoldingRegisters { slave, .. }
            | Self::WriteSingleRegister { slave, .. }
            | Self::Exception { slave, .. }
            | Self::Other { slave, .. } => slave,
        }
    }

    /// Function code as it appeared on the wire.
    pub fn function(&self) -> u8 {
        match *self {
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters.into(),
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister.into(),
            Self::Exception { function, .. } | Self::Other { function, .. } => function,
        }
    }
}

impl fmt::Display for ParsedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadHoldingRegisters { slave, values, .. } => {
                write!(f, "slave {slave}: read response, {} register(s) [", values.len())?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value:#06X}")?;
                }
                write!(f, "]")
            }
            Self::WriteSingleRegister {
                slave,
                address,
                value,
            } => write!(f, "slave {slave}: write confirmed, {address:#06X} = {value:#06X}"),
            Self::Exception {
                slave,
                function,
                code,
            } => write!(
                f,
                "slave {slave}: exception {code:#04X} for function {:#04X}",
                function & !EXCEPTION_BIT
            ),
            Self::Other {
                slave,
                function,
                payload,
            } => write!(
                f,
                "slave {slave}: function {function:#04X}, payload {}",
                format_hex(payload)
            ),
        }
    }
}

fn malformed(bytes: &[u8], reason: &'static str) -> FrameError {
    FrameError::MalformedFrame {
        len: bytes.len(),
        reason,
    }
}

/// Validate and decode a response frame.
///
/// Length is checked before the CRC: a CRC over a truncated frame means nothing.
pub fn decode_response(bytes: &[u8]) -> Result<ParsedResponse, FrameError> {
    check_crc(bytes)?;

    let slave = bytes[0];
    let function = bytes[1];
    let body = &bytes[2..bytes.len() - 2];

    if function & EXCEPTION_BIT != 0 {
        let code = body[0];
        return Ok(ParsedResponse::Exception {
            slave,
            function,
            code,
        });
    }

    match function {
        f if f == FunctionCode::ReadHoldingRegisters as u8 => {
            let byte_count = body[0];
            let data = &body[1..];
            if byte_count as usize != data.len() {
                return Err(malformed(bytes, "byte count disagrees with frame length"));
            }
            if byte_count % 2 != 0 {
                return Err(malformed(bytes, "odd register byte count"));
            }
            let mut values = Registers::new();
            for word in data.chunks_exact(2) {
                values
                    .push(u16::from_be_bytes([word[0], word[1]]))
                    .map_err(|_| malformed(bytes, "too many registers"))?;
            }
            Ok(ParsedResponse::ReadHoldingRegisters {
                slave,
                byte_count,
                values,
            })
        }
        f if f == FunctionCode::WriteSingleRegister as u8 => {
            if body.len() != 4 {
                return Err(malformed(bytes, "write echo must carry address and value"));
            }
            Ok(ParsedResponse::WriteSingleRegister {
                slave,
                address: u16::from_be_bytes([body[0], body[1]]),
                value: u16::from_be_bytes([body[2], body[3]]),
            })
        }
        _ => {
            let payload = heapless::Vec::from_slice(body)
                .map_err(|_| malformed(bytes, "payload overran frame buffer"))?;
            Ok(ParsedResponse::Other {
                slave,
                function,
                payload,
            })
        }
    }
}

/// Check minimum length and trailing CRC without interpreting the payload.
pub fn check_crc(bytes: &[u8]) -> Result<(), FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(malformed(bytes, "shorter than minimum frame"));
    }
    let (body, crc) = bytes.split_at(bytes.len() - 2);
    let received = u16::from_le_bytes([crc[0], crc[1]]);
    let expected = compute_crc16(body);
    if received != expected {
        return Err(FrameError::CrcMismatch { expected, received });
    }
    Ok(())
}

/// Render bytes as space separated upper-case hex, e.g. `01 06 00 01`.
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// The CRC of `bytes` as it would be typed after them: `"LO HI"`.
pub fn crc_hex(bytes: &[u8]) -> String {
    format_hex(&compute_crc16(bytes).to_le_bytes())
}

/// Parse hex text such as `"01 03 00 10 00 01"` or `"0103001000 01"`.
///
/// Whitespace is ignored. `XX` placeholders (typically standing in for a CRC
/// the user has not calculated) are dropped.
pub fn parse_hex(text: &str) -> Result<Frame, FrameError> {
    let mut digits: Vec<(usize, u8)> = Vec::with_capacity(text.len());
    let mut chars = text.char_indices().filter(|(_, c)| !c.is_whitespace());
    while let Some((position, c)) = chars.next() {
        if c.eq_ignore_ascii_case(&'x') {
            match chars.next() {
                Some((_, next)) if next.eq_ignore_ascii_case(&'x') => continue,
                _ => return Err(FrameError::InvalidHex { position }),
            }
        }
        let nibble = c
            .to_digit(16)
            .ok_or(FrameError::InvalidHex { position })? as u8;
        digits.push((position, nibble));
    }

    if digits.len() % 2 != 0 {
        let position = digits.last().map(|(p, _)| *p).unwrap_or(0);
        return Err(FrameError::InvalidHex { position });
    }

    let mut frame = Frame::new();
    for pair in digits.chunks_exact(2) {
        frame
            .push((pair[0].1 << 4) | pair[1].1)
            .map_err(|_| FrameError::InvalidHex {
                position: pair[0].0,
            })?;
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(body: &[u8]) -> Frame {
        let mut frame = Frame::new();
        frame.extend_from_slice(body).unwrap();
        append_crc(&mut frame).unwrap();
        frame
    }

    #[test]
    fn crc_matches_reference_vector() {
        let crc = compute_crc16(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(crc.to_le_bytes(), [0x19, 0xCA]);
        // Recomputing gives the same answer.
        assert_eq!(crc, compute_crc16(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x01]));
    }

    #[test]
    fn crc_of_empty_input_is_initial_value() {
        assert_eq!(compute_crc16(&[]), 0xFFFF);
    }

    #[test]
    fn encode_read_request() {
        let frame = encode_read_holding_registers(0x01, 0x0020, 1);
        assert_eq!(
            frame.as_slice(),
            [0x01, 0x03, 0x00, 0x20, 0x00, 0x01, 0x85, 0xC0]
        );
    }

    #[test]
    fn encode_write_request() {
        let frame = encode_write_single_register(0x01, 0x0001, 0x0001);
        assert_eq!(
            frame.as_slice(),
            [0x01, 0x06, 0x00, 0x01, 0x00, 0x01, 0x19, 0xCA]
        );
    }

    #[test]
    fn encoded_frames_match_rmodbus() {
        let mut expected: heapless::Vec<u8, 256> = heapless::Vec::new();
        let mut req = rmodbus::client::ModbusRequest::new(0x07, rmodbus::ModbusProto::Rtu);
        req.generate_get_holdings(0x0012, 2, &mut expected).unwrap();
        assert_eq!(
            encode_read_holding_registers(0x07, 0x0012, 2).as_slice(),
            expected.as_slice()
        );

        let mut expected: heapless::Vec<u8, 256> = heapless::Vec::new();
        let mut req = rmodbus::client::ModbusRequest::new(0x01, rmodbus::ModbusProto::Rtu);
        req.generate_set_holding(0x0030, 330, &mut expected).unwrap();
        assert_eq!(
            encode_write_single_register(0x01, 0x0030, 330).as_slice(),
            expected.as_slice()
        );
    }

    #[test]
    fn decode_read_response_round_trip() {
        let request = encode_read_holding_registers(0x01, 0x0010, 3);
        let count = u16::from_be_bytes([request[4], request[5]]);
        let reply = with_crc(&[0x01, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);

        match decode_response(&reply).unwrap() {
            ParsedResponse::ReadHoldingRegisters {
                slave,
                byte_count,
                values,
            } => {
                assert_eq!(slave, 0x01);
                assert_eq!(byte_count, 6);
                assert_eq!(values.len(), count as usize);
                assert_eq!(values.as_slice(), [1, 2, 3]);
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[test]
    fn decode_known_read_response() {
        let reply = [0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6];
        let parsed = decode_response(&reply).unwrap();
        assert!(matches!(
            parsed,
            ParsedResponse::ReadHoldingRegisters { ref values, .. } if values.as_slice() == [0x5678]
        ));
    }

    #[test]
    fn decode_write_echo() {
        let reply = encode_write_single_register(0x01, 0x0031, 250);
        assert_eq!(
            decode_response(&reply).unwrap(),
            ParsedResponse::WriteSingleRegister {
                slave: 0x01,
                address: 0x0031,
                value: 250
            }
        );
    }

    #[test]
    fn decode_exception_reply() {
        let reply = [0x01, 0x83, 0x02, 0xC0, 0xF1];
        let parsed = decode_response(&reply).unwrap();
        assert_eq!(
            parsed,
            ParsedResponse::Exception {
                slave: 0x01,
                function: 0x83,
                code: 0x02
            }
        );
        assert_eq!(
            parsed.to_string(),
            "slave 1: exception 0x02 for function 0x03"
        );
    }

    #[test]
    fn any_single_byte_mutation_is_rejected() {
        let valid = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x00, 0x13, 0x88]);
        assert!(decode_response(&valid).is_ok());

        for index in 0..valid.len() {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = valid.clone();
                corrupted[index] ^= flip;
                assert!(
                    matches!(
                        decode_response(&corrupted),
                        Err(FrameError::CrcMismatch { .. })
                    ),
                    "byte {index} xor {flip:#04X} was accepted"
                );
            }
        }
    }

    #[test]
    fn short_frame_is_malformed_before_crc() {
        // Four bytes with a nonsense CRC: length must win.
        let result = decode_response(&[0x01, 0x03, 0xAA, 0xBB]);
        assert!(matches!(
            result,
            Err(FrameError::MalformedFrame { len: 4, .. })
        ));
        assert!(matches!(
            decode_response(&[]),
            Err(FrameError::MalformedFrame { len: 0, .. })
        ));
    }

    #[test]
    fn byte_count_must_match_payload() {
        // Claims 4 bytes of registers but carries 2.
        let reply = with_crc(&[0x01, 0x03, 0x04, 0x12, 0x34]);
        assert!(matches!(
            decode_response(&reply),
            Err(FrameError::MalformedFrame { .. })
        ));

        let odd = with_crc(&[0x01, 0x03, 0x01, 0x12]);
        assert!(matches!(
            decode_response(&odd),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn truncated_write_echo_is_malformed() {
        let reply = with_crc(&[0x01, 0x06, 0x00, 0x30]);
        assert!(matches!(
            decode_response(&reply),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn unknown_function_passes_through() {
        let reply = with_crc(&[0x01, 0x11, 0x02, 0xAB, 0xCD]);
        match decode_response(&reply).unwrap() {
            ParsedResponse::Other {
                function, payload, ..
            } => {
                assert_eq!(function, 0x11);
                assert_eq!(payload.as_slice(), [0x02, 0xAB, 0xCD]);
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(format_hex(&[0x01, 0x06, 0xAB]), "01 06 AB");
        assert_eq!(format_hex(&[]), "");
        assert_eq!(crc_hex(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x01]), "19 CA");
    }

    #[test]
    fn parse_hex_accepts_spacing_and_placeholders() {
        let frame = parse_hex("01 06 0001 00 01 XX xx").unwrap();
        assert_eq!(frame.as_slice(), [0x01, 0x06, 0x00, 0x01, 0x00, 0x01]);

        let mut completed = frame.clone();
        append_crc(&mut completed).unwrap();
        assert_eq!(
            completed.as_slice(),
            [0x01, 0x06, 0x00, 0x01, 0x00, 0x01, 0x19, 0xCA]
        );
    }

    #[test]
    fn parse_hex_rejects_garbage() {
        assert_eq!(
            parse_hex("01 0G"),
            Err(FrameError::InvalidHex { position: 4 })
        );
        assert!(matches!(parse_hex("01 0"), Err(FrameError::InvalidHex { .. })));
        assert!(matches!(parse_hex("01 X1"), Err(FrameError::InvalidHex { .. })));
    }
}
