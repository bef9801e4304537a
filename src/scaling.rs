//! Scaling between raw register values and engineering units.
//!
//! The PSU reports voltage in centi-volts, current in milli-amps and power in
//! milli-watts. Setpoints are written in the same units.

use crate::error::PsuError;

/// Raw voltage units per volt.
pub const VOLTAGE_SCALE: f64 = 100.0;
/// Raw current units per amp.
pub const CURRENT_SCALE: f64 = 1000.0;
/// Raw power units per watt.
pub const POWER_SCALE: f64 = 1000.0;

/// Convert a raw voltage register value to volts.
#[inline]
pub fn raw_to_volts(raw: u16) -> f64 {
    raw as f64 / VOLTAGE_SCALE
}

/// Convert a raw current register value to amps.
#[inline]
pub fn raw_to_amps(raw: u16) -> f64 {
    raw as f64 / CURRENT_SCALE
}

/// Combine the power register pair (high word first) into milli-watts.
#[inline]
pub const fn combine_words(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Convert the power register pair to watts.
#[inline]
pub fn raw_to_watts(high: u16, low: u16) -> f64 {
    combine_words(high, low) as f64 / POWER_SCALE
}

/// Inclusive bounds applied to setpoints before anything is written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointLimits {
    pub max_voltage: f64,
    pub max_current: f64,
}

impl Default for SetpointLimits {
    /// 0-30V, 0-10A.
    fn default() -> Self {
        Self {
            max_voltage: 30.0,
            max_current: 10.0,
        }
    }
}

impl SetpointLimits {
    pub const fn new(max_voltage: f64, max_current: f64) -> Self {
        Self {
            max_voltage,
            max_current,
        }
    }

    /// Validate `volts` and return the register value to write.
    pub fn voltage_to_raw(&self, volts: f64) -> Result<u16, PsuError> {
        to_raw("voltage", volts, self.max_voltage, VOLTAGE_SCALE)
    }

    /// Validate `amps` and return the register value to write.
    pub fn current_to_raw(&self, amps: f64) -> Result<u16, PsuError> {
        to_raw("current", amps, self.max_current, CURRENT_SCALE)
    }
}

fn to_raw(quantity: &'static str, value: f64, max: f64, scale: f64) -> Result<u16, PsuError> {
    let out_of_range = || PsuError::OutOfRange {
        quantity,
        value,
        min: 0.0,
        max,
    };
    // NaN fails both comparisons, so it is rejected here too.
    if !(value >= 0.0 && value <= max) {
        return Err(out_of_range());
    }
    let raw = (value * scale).round();
    if raw > u16::MAX as f64 {
        return Err(out_of_range());
    }
    Ok(raw as u16)
}
