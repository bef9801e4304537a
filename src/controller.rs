use std::sync::{Mutex, MutexGuard, TryLockError};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    client::RtuClient,
    error::{PsuError, Result},
    register::{ProtectionFlags, PsuRegister, State},
    scaling::{raw_to_amps, raw_to_volts, raw_to_watts, SetpointLimits},
    transport::{Connector, SerialConfig},
};

/// Snapshot of the PSU, read fresh on every [`DeviceController::get_status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub output_enabled: bool,
    pub protection_status: ProtectionFlags,
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// Watts.
    pub power: f64,
}

/// The public face of the driver.
///
/// Owns the connection to one PSU. It can be shared between threads by
/// reference; only one transaction runs at a time and any call made while
/// another is in flight fails with [`PsuError::Busy`] instead of waiting.
///
/// For it's methods, we use the nomenclature that "set" writes a setpoint and
/// "get" reads back device state.
pub struct DeviceController<C: Connector> {
    session: Mutex<RtuClient<C>>,
    limits: SetpointLimits,
}

impl<C: Connector> DeviceController<C> {
    /// Create a disconnected controller.
    pub fn new(connector: C, config: SerialConfig) -> Self {
        Self {
            session: Mutex::new(RtuClient::new(connector, config)),
            limits: SetpointLimits::default(),
        }
    }

    /// Replace the bounds enforced by [`Self::set_voltage`] and [`Self::set_current`].
    pub fn with_limits(mut self, limits: SetpointLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> SetpointLimits {
        self.limits
    }

    /// Take the in-flight slot.
    fn session(&self) -> Result<MutexGuard<'_, RtuClient<C>>> {
        match self.session.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(PsuError::Busy),
            // A panic mid-transaction leaves nothing half-written we rely on.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    /// Open `port`. Fails with [`PsuError::AlreadyOpen`] if already connected.
    pub fn connect(&self, port: &str) -> Result<()> {
        let mut session = self.session()?;
        session.transport_mut().open(port)?;
        info!("connected to PSU on {port}");
        Ok(())
    }

    /// Close the port. Succeeds when already disconnected.
    pub fn disconnect(&self) -> Result<()> {
        let mut session = self.session()?;
        if !session.is_connected() {
            return Ok(());
        }
        if let Err(err) = session.transport_mut().close() {
            // The handle is released regardless.
            warn!("error while closing port: {err}");
        }
        info!("disconnected from PSU");
        Ok(())
    }

    /// Whether a port is open. Reports `false` after a fatal transport error.
    ///
    /// A transaction in flight implies a connection, so contention reads as connected.
    pub fn is_connected(&self) -> bool {
        match self.session() {
            Ok(session) => session.is_connected(),
            Err(_) => true,
        }
    }

    /// Read output state, protection flags and measurements.
    ///
    /// Either every register read succeeds or the first failure is returned.
    pub fn get_status(&self) -> Result<DeviceStatus> {
        let mut session = self.session()?;

        let output = session.read_register(PsuRegister::OutputEnable.address())?;
        let protection = session.read_register(PsuRegister::Protection.address())?;
        let voltage = session.read_register(PsuRegister::Voltage.address())?;
        let current = session.read_register(PsuRegister::Current.address())?;
        let power = session.read_registers(PsuRegister::PowerHigh.address(), 2)?;

        Ok(DeviceStatus {
            output_enabled: bool::from(State::from(output)),
            protection_status: ProtectionFlags::from(protection),
            voltage: raw_to_volts(voltage),
            current: raw_to_amps(current),
            power: raw_to_watts(power[0], power[1]),
        })
    }

    /// Set the output voltage in volts.
    pub fn set_voltage(&self, volts: f64) -> Result<()> {
        let raw = self.limits.voltage_to_raw(volts)?;
        debug!("set voltage {volts} V (raw {raw})");
        self.session()?
            .write_register(PsuRegister::VoltageSetpoint.address(), raw)
    }

    /// Set the current limit in amps.
    pub fn set_current(&self, amps: f64) -> Result<()> {
        let raw = self.limits.current_to_raw(amps)?;
        debug!("set current {amps} A (raw {raw})");
        self.session()?
            .write_register(PsuRegister::CurrentSetpoint.address(), raw)
    }

    /// Enable/disable the output.
    pub fn set_output(&self, state: impl Into<State>) -> Result<()> {
        let state = state.into();
        self.session()?
            .write_register(PsuRegister::OutputEnable.address(), state as u16)
    }

    /// Send a hand-built frame and return the reply bytes.
    ///
    /// No register semantics are applied, but the reply must still pass its CRC.
    pub fn send_raw_frame(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let reply = self.session()?.send_raw(frame)?;
        Ok(reply.to_vec())
    }

    /// Read a single holding register.
    pub fn read_register(&self, address: u16) -> Result<u16> {
        self.session()?.read_register(address)
    }

    /// Write a single holding register.
    pub fn write_register(&self, address: u16, value: u16) -> Result<()> {
        self.session()?.write_register(address, value)
    }

    /// Read `count` registers from `start`, one request each.
    ///
    /// Registers the device refuses or garbles are left out rather than
    /// failing the dump. Losing the connection still aborts it.
    pub fn dump_registers(&self, start: u16, count: u16) -> Result<Vec<(u16, u16)>> {
        let mut session = self.session()?;
        let mut dump = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let Some(address) = start.checked_add(offset) else {
                break;
            };
            match session.read_register(address) {
                Ok(value) => dump.push((address, value)),
                Err(err @ PsuError::NotConnected) => return Err(err),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!("skipping register {address:#06X}: {err}"),
            }
        }
        Ok(dump)
    }
}
