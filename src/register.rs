//! This module is used to define the holding registers on the PSU.

use core::fmt;

use modular_bitfield::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u16)]
pub enum PsuRegister {
    /// __R/W__ - Output enable.
    /// * `0` - Output off.
    /// * `1` - Output on.
    OutputEnable = 0x0001,
    /// __R__ - Protection bitmask.
    ///
    /// See [`ProtectionStatus`] for the bit layout.
    Protection = 0x0002,
    /// __R__ - Measured output voltage.
    ///
    /// Value is u16 in centi-volts. E.g. `1250` => 12.5V.
    Voltage = 0x0010,
    /// __R__ - Measured output current.
    ///
    /// Value is u16 in milli-amps. E.g. `2000` => 2.0A.
    Current = 0x0011,
    /// __R__ - Measured output power, high 16 bits.
    PowerHigh = 0x0012,
    /// __R__ - Measured output power, low 16 bits.
    ///
    /// Combined with [`PsuRegister::PowerHigh`] the value is u32 in milli-watts.
    PowerLow = 0x0013,
    /// __R/W__ - Voltage setting, centi-volts.
    VoltageSetpoint = 0x0030,
    /// __R/W__ - Current setting, milli-amps.
    CurrentSetpoint = 0x0031,
}

impl PsuRegister {
    pub const fn address(self) -> u16 {
        self as u16
    }
}

impl From<PsuRegister> for u16 {
    fn from(value: PsuRegister) -> Self {
        value as u16
    }
}

/// Used to be less ambiguous about whether something is on or off.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    /// Disabled.
    #[default]
    Off = 0x00,
    /// Enabled.
    On = 0x01,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

impl From<u16> for State {
    /// Anything but exactly `1` reads as off.
    fn from(value: u16) -> Self {
        State::from(value == State::On as u16)
    }
}

/// "Protection status register", as laid out on the wire.
#[bitfield(bits = 16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionStatus {
    /// bit 0: OVP over-voltage protection.
    pub over_voltage: bool,
    /// bit 1: OCP over-current protection.
    pub over_current: bool,
    /// bit 2: OPP over-power protection.
    pub over_power: bool,
    /// bit 3: OTP over-temperature protection.
    pub over_temperature: bool,
    /// bit 4: SCP short-circuit protection.
    pub short_circuit: bool,
    #[skip]
    __: B11,
}

impl From<u16> for ProtectionStatus {
    fn from(value: u16) -> Self {
        ProtectionStatus::from_bytes(value.to_le_bytes())
    }
}

impl From<ProtectionStatus> for u16 {
    fn from(value: ProtectionStatus) -> Self {
        u16::from_le_bytes(value.into_bytes())
    }
}

/// The individual protection trips a PSU can report.
#[derive(Debug, EnumIter, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ProtectionFlag {
    /// OVP.
    OverVoltage = 0,
    /// OCP.
    OverCurrent = 1,
    /// OPP.
    OverPower = 2,
    /// OTP.
    OverTemperature = 3,
    /// SCP.
    ShortCircuit = 4,
}

impl ProtectionFlag {
    /// Bit in the protection register.
    pub const fn mask(self) -> u16 {
        1 << (self as u8)
    }

    pub const fn abbreviation(self) -> &'static str {
        match self {
            Self::OverVoltage => "OVP",
            Self::OverCurrent => "OCP",
            Self::OverPower => "OPP",
            Self::OverTemperature => "OTP",
            Self::ShortCircuit => "SCP",
        }
    }
}

/// Protection state handed to callers; one field per [`ProtectionFlag`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ProtectionFlags {
    pub ovp: bool,
    pub ocp: bool,
    pub opp: bool,
    pub otp: bool,
    pub scp: bool,
}

impl ProtectionFlags {
    pub fn is_set(&self, flag: ProtectionFlag) -> bool {
        match flag {
            ProtectionFlag::OverVoltage => self.ovp,
            ProtectionFlag::OverCurrent => self.ocp,
            ProtectionFlag::OverPower => self.opp,
            ProtectionFlag::OverTemperature => self.otp,
            ProtectionFlag::ShortCircuit => self.scp,
        }
    }

    /// True when any protection has tripped.
    pub fn any(&self) -> bool {
        self.ovp || self.ocp || self.opp || self.otp || self.scp
    }
}

/// Tripped protections by abbreviation, e.g. `OVP, OPP`, or `none`.
impl fmt::Display for ProtectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tripped = ProtectionFlag::iter().filter(|flag| self.is_set(*flag));
        match tripped.next() {
            None => write!(f, "none"),
            Some(first) => {
                write!(f, "{}", first.abbreviation())?;
                for flag in tripped {
                    write!(f, ", {}", flag.abbreviation())?;
                }
                Ok(())
            }
        }
    }
}

impl From<ProtectionStatus> for ProtectionFlags {
    fn from(status: ProtectionStatus) -> Self {
        Self {
            ovp: status.over_voltage(),
            ocp: status.over_current(),
            opp: status.over_power(),
            otp: status.over_temperature(),
            scp: status.short_circuit(),
        }
    }
}

impl From<u16> for ProtectionFlags {
    fn from(value: u16) -> Self {
        ProtectionStatus::from(value).into()
    }
}
