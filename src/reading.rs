//! Decoded thermometer readings.

use crate::mac_address::MacAddress;
use std::time::SystemTime;

/// One decoded advertisement.
///
/// Values are normalized regardless of the firmware record format:
/// - Temperature in hundredths of a degree Celsius
/// - Relative humidity in hundredths of a percent
/// - Battery potential in millivolts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reading {
    /// Address of the sensor that sent the advertisement
    pub address: MacAddress,
    /// Temperature in °C × 100
    pub temperature_centi: i16,
    /// Relative humidity in % × 100
    pub humidity_centi: u16,
    /// Battery potential in mV
    pub battery_mv: u16,
    /// Battery level, 0-100 %
    pub battery_percent: u8,
    /// Per-device sequence number, wraps at 256
    pub counter: u8,
    /// Firmware specific flag bits
    pub flags: u8,
}

impl Reading {
    /// Temperature in degrees Celsius.
    pub fn temperature(&self) -> f64 {
        f64::from(self.temperature_centi) / 100.0
    }

    /// Relative humidity in percent.
    pub fn humidity(&self) -> f64 {
        f64::from(self.humidity_centi) / 100.0
    }
}

/// A reading together with the time it was captured.
///
/// The timestamp is assigned when the advertisement is received, the
/// sensors do not send one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub reading: Reading,
    pub observed_at: SystemTime,
}

impl Observation {
    /// Stamp a reading with the current time.
    pub fn now(reading: Reading) -> Self {
        Self {
            reading,
            observed_at: SystemTime::now(),
        }
    }
}
