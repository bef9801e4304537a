//! Byte level request/response exchange over a serial link.
//!
//! The transport owns the open port. RTU has no message delimiters, so a
//! response is taken to be the next burst of bytes that arrives after a request,
//! ending once the line has been quiet for one inter-frame gap.

use std::thread;
use std::time::{Duration, Instant};

use embedded_io::{Read, ReadReady, Write};
use fugit::{MicrosDurationU32, MillisDurationU32};
use log::{debug, trace, warn};

use crate::{
    error::{ConnectError, TransportError},
    frame::{format_hex, Frame, MAX_FRAME_LEN},
};

/// Default slave address of the PSU.
pub const DEFAULT_SLAVE_ADDRESS: u8 = 0x01;
/// Default line speed. The link always runs 8 data bits, 1 stop bit, no parity.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Above this baud rate Modbus fixes the inter-frame gap instead of scaling it.
const FIXED_GAP_BAUD_THRESHOLD: u32 = 19_200;
const FIXED_GAP_US: u32 = 1_750;

/// Something that can open a serial port by name.
///
/// The returned handle must support non-blocking "is there data?" checks via
/// [`ReadReady`]; timeouts are enforced by the transport, not the port.
pub trait Connector {
    type Port: Read + Write + ReadReady;
    type Error: core::fmt::Display;

    fn open(&mut self, port: &str, config: &SerialConfig) -> Result<Self::Port, Self::Error>;
}

/// Link and timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Default for PSU is 0x01.
    pub slave_address: u8,
    /// How long to wait for the first byte of a response.
    pub response_timeout: MillisDurationU32,
    /// Pause before every request so the slave has turned its line around.
    pub guard_delay: MillisDurationU32,
    /// How often the port is checked for data while waiting.
    pub poll_interval: MicrosDurationU32,
    /// Silence that ends a response. `None` derives the Modbus t3.5 gap from the baud rate.
    pub inter_frame_gap: Option<MicrosDurationU32>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            slave_address: DEFAULT_SLAVE_ADDRESS,
            response_timeout: MillisDurationU32::millis(1000),
            guard_delay: MillisDurationU32::millis(4),
            poll_interval: MicrosDurationU32::micros(1000),
            inter_frame_gap: None,
        }
    }
}

impl SerialConfig {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_slave_address(mut self, slave_address: u8) -> Self {
        self.slave_address = slave_address;
        self
    }

    pub fn with_response_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_guard_delay(mut self, delay: MillisDurationU32) -> Self {
        self.guard_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: MicrosDurationU32) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_inter_frame_gap(mut self, gap: MicrosDurationU32) -> Self {
        self.inter_frame_gap = Some(gap);
        self
    }

    /// Silence that marks the end of a frame.
    ///
    /// 3.5 character times at 11 bits per character, or 1.75 ms above 19200 baud.
    pub fn frame_gap(&self) -> MicrosDurationU32 {
        if let Some(gap) = self.inter_frame_gap {
            return gap;
        }
        if self.baud_rate == 0 || self.baud_rate > FIXED_GAP_BAUD_THRESHOLD {
            return MicrosDurationU32::micros(FIXED_GAP_US);
        }
        MicrosDurationU32::micros(38_500_000u32.div_ceil(self.baud_rate))
    }
}

fn millis(duration: MillisDurationU32) -> Duration {
    Duration::from_millis(duration.to_millis() as u64)
}

fn micros(duration: MicrosDurationU32) -> Duration {
    Duration::from_micros(duration.to_micros() as u64)
}

/// Exclusive owner of one serial connection.
///
/// All exchanges take `&mut self`, so two transactions can never be interleaved
/// on the same transport.
pub struct Transport<C: Connector> {
    connector: C,
    config: SerialConfig,
    port: Option<C::Port>,
    port_name: Option<String>,
}

impl<C: Connector> Transport<C> {
    pub fn new(connector: C, config: SerialConfig) -> Self {
        Self {
            connector,
            config,
            port: None,
            port_name: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Name of the currently open port, if any.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Acquire the named port.
    pub fn open(&mut self, port: &str) -> Result<(), ConnectError> {
        if self.port.is_some() {
            return Err(ConnectError::AlreadyOpen);
        }
        let handle = self
            .connector
            .open(port, &self.config)
            .map_err(|err| ConnectError::PortUnavailable {
                port: port.into(),
                reason: err.to_string(),
            })?;
        debug!("opened {port} at {} baud", self.config.baud_rate);
        self.port = Some(handle);
        self.port_name = Some(port.into());
        Ok(())
    }

    /// Release the port. Calling this on a closed transport does nothing.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        let name = self.port_name.take().unwrap_or_default();
        let flushed = port
            .flush()
            .map_err(|err| TransportError::WriteFailed(format!("{err:?}")));
        drop(port);
        debug!("closed {name}");
        flushed
    }

    /// Send `request` and return the next response burst.
    ///
    /// A write or read failure leaves the port unusable, so it is closed before
    /// the error is returned. A timeout leaves it open.
    pub fn transact(
        &mut self,
        request: &[u8],
        timeout: MillisDurationU32,
    ) -> Result<Frame, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        let result = Self::exchange(port, &self.config, request, timeout);
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(
                    "closing {} after fatal error: {err}",
                    self.port_name.as_deref().unwrap_or("port")
                );
                self.port = None;
                self.port_name = None;
            }
        }
        result
    }

    fn exchange(
        port: &mut C::Port,
        config: &SerialConfig,
        request: &[u8],
        timeout: MillisDurationU32,
    ) -> Result<Frame, TransportError> {
        let poll = micros(config.poll_interval);

        thread::sleep(millis(config.guard_delay));

        // Anything already waiting belongs to an earlier request that gave up,
        // including bytes that landed during the guard delay.
        Self::discard_pending(port)?;

        trace!("TX {}", format_hex(request));
        port.write_all(request).map_err(write_failed)?;
        port.flush().map_err(write_failed)?;

        let deadline = Instant::now() + millis(timeout);
        while !port.read_ready().map_err(read_failed)? {
            if Instant::now() >= deadline {
                return Err(TransportError::ResponseTimeout {
                    timeout_ms: timeout.to_millis(),
                });
            }
            thread::sleep(poll);
        }

        let response = Self::read_burst(port, micros(config.frame_gap()), poll)?;
        trace!("RX {}", format_hex(&response));
        Ok(response)
    }

    /// Read until the line has been idle for `gap`.
    fn read_burst(
        port: &mut C::Port,
        gap: Duration,
        poll: Duration,
    ) -> Result<Frame, TransportError> {
        let mut response = Frame::new();
        let mut chunk = [0u8; 64];
        'burst: loop {
            let read = port.read(&mut chunk).map_err(read_failed)?;
            if read == 0 {
                break;
            }
            response
                .extend_from_slice(&chunk[..read])
                .map_err(|_| TransportError::Overrun {
                    limit: MAX_FRAME_LEN,
                })?;

            let quiet_since = Instant::now();
            loop {
                if port.read_ready().map_err(read_failed)? {
                    continue 'burst;
                }
                if quiet_since.elapsed() >= gap {
                    break 'burst;
                }
                thread::sleep(poll.min(gap));
            }
        }
        Ok(response)
    }

    fn discard_pending(port: &mut C::Port) -> Result<(), TransportError> {
        let mut scratch = [0u8; 64];
        let mut discarded = 0usize;
        while port.read_ready().map_err(read_failed)? {
            let read = port.read(&mut scratch).map_err(read_failed)?;
            if read == 0 {
                break;
            }
            trace!("stale {}", format_hex(&scratch[..read]));
            discarded += read;
        }
        if discarded > 0 {
            warn!("discarded {discarded} stale byte(s) before request");
        }
        Ok(())
    }
}

fn write_failed<E: embedded_io::Error>(err: E) -> TransportError {
    TransportError::WriteFailed(format!("{:?}: {err:?}", err.kind()))
}

fn read_failed<E: embedded_io::Error>(err: E) -> TransportError {
    TransportError::ReadFailed(format!("{:?}: {err:?}", err.kind()))
}
