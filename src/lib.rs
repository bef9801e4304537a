//! This crate provides a master-side driver for a Modbus RTU bench power supply.
//!
//! It reads the output state, protection flags and measurements from the PSU's
//! holding registers and writes voltage/current setpoints and the output enable.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//! * Slave address: 1
//!
//! Register map:
//!
//! | Address | Access | Meaning | Scale |
//! |---|---|---|---|
//! | `0x0001` | R/W | Output enable | 0/1 |
//! | `0x0002` | R | Protection bitmask (OVP, OCP, OPP, OTP, SCP) | bits 0-4 |
//! | `0x0010` | R | Output voltage | ÷100 → V |
//! | `0x0011` | R | Output current | ÷1000 → A |
//! | `0x0012`-`0x0013` | R | Output power, high word first | ÷1000 → W |
//! | `0x0030` | R/W | Voltage setpoint | ×100 |
//! | `0x0031` | R/W | Current setpoint | ×1000 |
//!
//! ```no_run
//! use bench_psu_rtu::{DeviceController, SerialConfig, SerialConnector};
//!
//! let psu = DeviceController::new(SerialConnector, SerialConfig::default());
//! psu.connect("/dev/ttyUSB0")?;
//! psu.set_voltage(5.0)?;
//! psu.set_current(0.5)?;
//! psu.set_output(true)?;
//! println!("{:?}", psu.get_status()?);
//! # Ok::<(), bench_psu_rtu::error::PsuError>(())
//! ```

pub mod client;
pub mod controller;
pub mod error;
pub mod frame;
pub mod register;
pub mod sampling;
pub mod scaling;
#[cfg(feature = "serial")]
pub mod serial;
pub mod transport;

#[cfg(test)]
mod mock_serial;

pub use controller::{DeviceController, DeviceStatus};
pub use error::{PsuError, Result};
pub use register::{ProtectionFlag, ProtectionFlags, PsuRegister, State};
pub use sampling::{StatusPoller, StatusSample, StatusSink};
pub use scaling::SetpointLimits;
#[cfg(feature = "serial")]
pub use serial::SerialConnector;
pub use transport::{Connector, SerialConfig};
