//! Our error types for the PSU driver.
//!
//! Each layer has its own closed error enum. They all convert into [`PsuError`],
//! which is what the public façade hands back to callers.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, PsuError>;

/// Failures while decoding a received frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: {reason} ({len} bytes)")]
    MalformedFrame { len: usize, reason: &'static str },
    #[error("CRC mismatch: computed {expected:#06X}, received {received:#06X}")]
    CrcMismatch { expected: u16, received: u16 },
    #[error("Invalid hex input at position {position}")]
    InvalidHex { position: usize },
}

/// Failures while acquiring the serial port.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("A port is already open")]
    AlreadyOpen,
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },
}

/// Failures of a single request/response exchange on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Port is not open")]
    NotOpen,
    #[error("Serial write failed: {0}")]
    WriteFailed(String),
    #[error("Serial read failed: {0}")]
    ReadFailed(String),
    #[error("No response within {timeout_ms} ms")]
    ResponseTimeout { timeout_ms: u32 },
    #[error("Response exceeded {limit} bytes")]
    Overrun { limit: usize },
}

impl TransportError {
    /// The port can no longer be trusted after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WriteFailed(_) | Self::ReadFailed(_))
    }
}

/// Every failure the PSU driver can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PsuError {
    #[error("Not connected to PSU")]
    NotConnected,
    #[error("Already connected")]
    AlreadyOpen,
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },
    #[error("Serial write failed: {0}")]
    WriteFailed(String),
    #[error("Serial read failed: {0}")]
    ReadFailed(String),
    #[error("Response timeout after {timeout_ms} ms")]
    ResponseTimeout { timeout_ms: u32 },
    #[error("Malformed frame: {reason} ({len} bytes)")]
    MalformedFrame { len: usize, reason: &'static str },
    #[error("CRC check failed: computed {expected:#06X}, received {received:#06X}")]
    CrcMismatch { expected: u16, received: u16 },
    #[error(
        "Write to register {address:#06X} not confirmed: sent {expected:#06X}, echoed {echoed_address:#06X}={echoed:#06X}"
    )]
    WriteVerificationFailed {
        address: u16,
        expected: u16,
        echoed_address: u16,
        echoed: u16,
    },
    #[error("Another transaction is in flight")]
    Busy,
    #[error("{quantity} value {value} outside {min}..={max}")]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Device exception {code:#04X} for function {function:#04X}")]
    DeviceException { function: u8, code: u8 },
    #[error("Invalid hex input at position {position}")]
    InvalidHex { position: usize },
}

impl PsuError {
    /// Worth retrying after a short pause: the device may just be busy.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ResponseTimeout { .. } | Self::Busy)
    }

    /// The connection was torn down because of this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WriteFailed(_) | Self::ReadFailed(_))
    }
}

impl From<FrameError> for PsuError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::MalformedFrame { len, reason } => PsuError::MalformedFrame { len, reason },
            FrameError::CrcMismatch { expected, received } => {
                PsuError::CrcMismatch { expected, received }
            }
            FrameError::InvalidHex { position } => PsuError::InvalidHex { position },
        }
    }
}

impl From<ConnectError> for PsuError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::AlreadyOpen => PsuError::AlreadyOpen,
            ConnectError::PortUnavailable { port, reason } => {
                PsuError::PortUnavailable { port, reason }
            }
        }
    }
}

impl From<TransportError> for PsuError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotOpen => PsuError::NotConnected,
            TransportError::WriteFailed(msg) => PsuError::WriteFailed(msg),
            TransportError::ReadFailed(msg) => PsuError::ReadFailed(msg),
            TransportError::ResponseTimeout { timeout_ms } => {
                PsuError::ResponseTimeout { timeout_ms }
            }
            TransportError::Overrun { limit } => PsuError::MalformedFrame {
                len: limit,
                reason: "response overran frame buffer",
            },
        }
    }
}
