//! # TMP117 Configuration Register
//!
//! Value type for the TMP117 configuration register (0x01).
//!
//! The same 16-bit register reports the alert flags and holds the device
//! configuration, so reading the flags and packing a new configuration both go
//! through the [`BitField`] primitive.
//!
//! | Bit(s) | Field |
//! |--------|-------|
//! | 15 | HIGH_Alert flag |
//! | 14 | LOW_Alert flag |
//! | 13 | Data_Ready flag |
//! | 11:10 | Conversion mode |
//! | 4 | Alert function mode (therm / alert) |
//! | 3 | Alert pin polarity |
//! | 1 | Soft reset |

use super::bits::{BitError, BitField};

/// Temperature resolution of the result and limit registers (°C per LSB)
pub const TMP117_RESOLUTION: f64 = 0.0078125;

const BIT_HIGH_ALERT: u32 = 15;
const BIT_LOW_ALERT: u32 = 14;
const BIT_DATA_READY: u32 = 13;
const CONVERSION_MODE_OFFSET: u32 = 10;
const CONVERSION_MODE_WIDTH: u32 = 2;
const BIT_ALERT_MODE: u32 = 4;
const BIT_ALERT_POLARITY: u32 = 3;

/// Decode the alert flags of a status register read.
///
/// Returns `(low_alert, high_alert)` from bits 14 and 15.
///
/// ```
/// use tracker_link::sensor::decode_status_register;
///
/// assert_eq!(decode_status_register(0x8000), (false, true));
/// assert_eq!(decode_status_register(0x4000), (true, false));
/// ```
pub fn decode_status_register(register: u16) -> (bool, bool) {
    let config = Tmp117Config::from_raw(register);
    (config.low_alert(), config.high_alert())
}

/// Conversion mode (bits 11:10)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// 00 (and 10, which reads back as 00)
    Continuous,
    /// 01
    Shutdown,
    /// 11
    OneShot,
}

impl ConversionMode {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0b01 => Self::Shutdown,
            0b11 => Self::OneShot,
            _ => Self::Continuous,
        }
    }

    fn bits(self) -> u16 {
        match self {
            Self::Continuous => 0b00,
            Self::Shutdown => 0b01,
            Self::OneShot => 0b11,
        }
    }
}

/// Behaviour of the ALERT pin (bit 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertFunction {
    /// Thermostat mode
    Therm,
    /// Alert mode
    Alert,
}

/// ALERT pin polarity (bit 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPolarity {
    ActiveLow,
    ActiveHigh,
}

/// TMP117 configuration register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tmp117Config(u16);

impl Tmp117Config {
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    // Offsets below are all < 16, so the bit primitive cannot fail on them.
    fn bit(self, offset: u32) -> bool {
        self.0.test_bit(offset).unwrap_or(false)
    }

    fn with_bit(self, offset: u32, on: bool) -> Result<Self, BitError> {
        Ok(Self(self.0.write_bit(offset, on)?))
    }

    pub fn high_alert(self) -> bool {
        self.bit(BIT_HIGH_ALERT)
    }

    pub fn low_alert(self) -> bool {
        self.bit(BIT_LOW_ALERT)
    }

    /// Either alert flag is raised
    pub fn any_alert(self) -> bool {
        self.high_alert() || self.low_alert()
    }

    pub fn data_ready(self) -> bool {
        self.bit(BIT_DATA_READY)
    }

    pub fn conversion_mode(self) -> ConversionMode {
        let bits = self
            .0
            .field(CONVERSION_MODE_OFFSET, CONVERSION_MODE_WIDTH)
            .unwrap_or(0);
        ConversionMode::from_bits(bits)
    }

    pub fn with_conversion_mode(self, mode: ConversionMode) -> Result<Self, BitError> {
        Ok(Self(self.0.with_field(
            CONVERSION_MODE_OFFSET,
            CONVERSION_MODE_WIDTH,
            mode.bits(),
        )?))
    }

    pub fn alert_function(self) -> AlertFunction {
        if self.bit(BIT_ALERT_MODE) {
            AlertFunction::Alert
        } else {
            AlertFunction::Therm
        }
    }

    pub fn with_alert_function(self, function: AlertFunction) -> Result<Self, BitError> {
        self.with_bit(BIT_ALERT_MODE, function == AlertFunction::Alert)
    }

    pub fn alert_polarity(self) -> AlertPolarity {
        if self.bit(BIT_ALERT_POLARITY) {
            AlertPolarity::ActiveHigh
        } else {
            AlertPolarity::ActiveLow
        }
    }

    pub fn with_alert_polarity(self, polarity: AlertPolarity) -> Result<Self, BitError> {
        self.with_bit(BIT_ALERT_POLARITY, polarity == AlertPolarity::ActiveHigh)
    }

    /// Configuration used when arming the temperature alert: continuous
    /// conversion with the ALERT pin in alert mode.
    pub fn alert_armed(self) -> Result<Self, BitError> {
        self.with_conversion_mode(ConversionMode::Continuous)?
            .with_alert_function(AlertFunction::Alert)
    }
}

/// Convert a temperature limit (°C) to the signed register count.
pub fn limit_to_register(celsius: f64) -> i16 {
    let counts = (celsius / TMP117_RESOLUTION).round();
    counts.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Convert a signed result/limit register count to °C.
pub fn register_to_celsius(counts: i16) -> f64 {
    counts as f64 * TMP117_RESOLUTION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status_register() {
        assert_eq!(decode_status_register(0x0000), (false, false));
        assert_eq!(decode_status_register(0x4000), (true, false));
        assert_eq!(decode_status_register(0x8000), (false, true));
        assert_eq!(decode_status_register(0xC000), (true, true));
        // Unrelated bits do not leak into the flags
        assert_eq!(decode_status_register(0x3FFF), (false, false));
    }

    #[test]
    fn test_flags() {
        let config = Tmp117Config::from_raw(0xE000);
        assert!(config.high_alert());
        assert!(config.low_alert());
        assert!(config.data_ready());
        assert!(config.any_alert());
        assert!(!Tmp117Config::from_raw(0x2000).any_alert());
    }

    #[test]
    fn test_conversion_mode() {
        assert_eq!(Tmp117Config::from_raw(0x0000).conversion_mode(), ConversionMode::Continuous);
        assert_eq!(Tmp117Config::from_raw(0x0400).conversion_mode(), ConversionMode::Shutdown);
        assert_eq!(Tmp117Config::from_raw(0x0800).conversion_mode(), ConversionMode::Continuous);
        assert_eq!(Tmp117Config::from_raw(0x0C00).conversion_mode(), ConversionMode::OneShot);
    }

    #[test]
    fn test_set_conversion_mode_preserves_other_bits() {
        let config = Tmp117Config::from_raw(0x0220) // reset default plus bit 5
            .with_conversion_mode(ConversionMode::OneShot)
            .unwrap();
        assert_eq!(config.raw(), 0x0E20);
        let config = config.with_conversion_mode(ConversionMode::Shutdown).unwrap();
        assert_eq!(config.raw(), 0x0620);
        let config = config.with_conversion_mode(ConversionMode::Continuous).unwrap();
        assert_eq!(config.raw(), 0x0220);
    }

    #[test]
    fn test_alert_function_and_polarity() {
        let config = Tmp117Config::default()
            .with_alert_function(AlertFunction::Alert)
            .unwrap()
            .with_alert_polarity(AlertPolarity::ActiveHigh)
            .unwrap();
        assert_eq!(config.raw(), 0b1_1000);
        assert_eq!(config.alert_function(), AlertFunction::Alert);
        assert_eq!(config.alert_polarity(), AlertPolarity::ActiveHigh);

        let config = config.with_alert_function(AlertFunction::Therm).unwrap();
        assert_eq!(config.raw(), 0b0_1000);
    }

    #[test]
    fn test_alert_armed() {
        let config = Tmp117Config::from_raw(0x0C00).alert_armed().unwrap();
        assert_eq!(config.conversion_mode(), ConversionMode::Continuous);
        assert_eq!(config.alert_function(), AlertFunction::Alert);
        assert_eq!(config.raw(), 0x0010);
    }

    #[test]
    fn test_limit_conversion() {
        assert_eq!(limit_to_register(50.0), 6400);
        assert_eq!(limit_to_register(-10.0), -1280);
        assert!((register_to_celsius(6400) - 50.0).abs() < 1e-9);
        assert_eq!(limit_to_register(1000.0), i16::MAX);
    }
}
