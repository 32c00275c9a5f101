//! # RuuviTag Payload Decoder
//!
//! Decodes the external environmental beacon into an [`ExternalSensorReading`].
//!
//! ## Formats
//!
//! | Code | Name | Transport | Fields |
//! |------|------|-----------|--------|
//! | 2, 4 | Eddystone-URL | base64 fragment of the beacon URL | humidity, temperature, pressure |
//! | 3 | RAWv1 | manufacturer data | + acceleration, battery |
//! | 5 | RAWv2 | manufacturer data | + tx power, movement counter, sequence |
//!
//! Manufacturer data starts with the two-byte manufacturer id, so the format
//! discriminant sits at index 2 and every field offset below is relative to
//! the start of the manufacturer data. Multi-byte fields are big-endian.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::{debug, warn};

use super::bits::BitField;
use super::SensorError;

/// Offset of the format discriminant in manufacturer data
pub const FORMAT_OFFSET: usize = 2;

/// RAWv1 data format code
pub const FORMAT_RAW_V1: u8 = 3;

/// RAWv2 data format code
pub const FORMAT_RAW_V2: u8 = 5;

/// Eddystone-URL data format codes
pub const FORMAT_URL: u8 = 2;
pub const FORMAT_URL_WITH_ID: u8 = 4;

/// Minimum manufacturer data length for RAWv1
pub const RAW_V1_MIN_LEN: usize = 16;

/// Minimum manufacturer data length for RAWv2
pub const RAW_V2_MIN_LEN: usize = 20;

/// Offset added to the encoded pressure (Pa)
pub const PRESSURE_OFFSET: u32 = 50_000;

/// Offset added to the RAWv2 battery field (mV)
pub const RAW_V2_BATTERY_OFFSET: u16 = 1600;

/// Number of base64 characters carrying the URL payload
const URL_PAYLOAD_CHARS: usize = 8;

/// Reading from an Eddystone-URL beacon (formats 2 and 4)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UrlReading {
    /// Format code (2 or 4)
    pub format: u8,
    /// Relative humidity in %
    pub humidity: f64,
    /// Temperature in °C
    pub temperature: f64,
    /// Pressure in Pa
    pub pressure: u32,
    /// Tag identifier byte (format 4 only)
    pub identifier: Option<u8>,
}

/// Reading from a RAWv1 payload (format 3)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawV1Reading {
    /// Relative humidity in %
    pub humidity: f64,
    /// Temperature in °C
    pub temperature: f64,
    /// Pressure in Pa
    pub pressure: u32,
    /// Acceleration x/y/z in mG
    pub acceleration: [i16; 3],
    /// Battery voltage in mV
    pub battery_mv: u16,
}

/// Reading from a RAWv2 payload (format 5)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawV2Reading {
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in %
    pub humidity: f64,
    /// Pressure in Pa
    pub pressure: u32,
    /// Acceleration x/y/z in mG
    pub acceleration: [i16; 3],
    /// Battery voltage in mV
    pub battery_mv: u16,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
    /// Movement counter
    pub movement_counter: u8,
    /// Measurement sequence number
    pub measurement_sequence: u16,
}

/// Decoded external sensor reading, discriminated by format code.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ExternalSensorReading {
    /// No reading available
    #[default]
    Absent,
    /// Formats 2 and 4
    Url(UrlReading),
    /// Format 3
    RawV1(RawV1Reading),
    /// Format 5
    RawV2(RawV2Reading),
}

impl ExternalSensorReading {
    /// Format code carried on the wire (0 when absent).
    pub fn format(&self) -> u8 {
        match self {
            Self::Absent => 0,
            Self::Url(r) => r.format,
            Self::RawV1(_) => FORMAT_RAW_V1,
            Self::RawV2(_) => FORMAT_RAW_V2,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn humidity(&self) -> Option<f64> {
        match self {
            Self::Absent => None,
            Self::Url(r) => Some(r.humidity),
            Self::RawV1(r) => Some(r.humidity),
            Self::RawV2(r) => Some(r.humidity),
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        match self {
            Self::Absent => None,
            Self::Url(r) => Some(r.temperature),
            Self::RawV1(r) => Some(r.temperature),
            Self::RawV2(r) => Some(r.temperature),
        }
    }

    pub fn pressure(&self) -> Option<u32> {
        match self {
            Self::Absent => None,
            Self::Url(r) => Some(r.pressure),
            Self::RawV1(r) => Some(r.pressure),
            Self::RawV2(r) => Some(r.pressure),
        }
    }

    pub fn acceleration(&self) -> Option<[i16; 3]> {
        match self {
            Self::RawV1(r) => Some(r.acceleration),
            Self::RawV2(r) => Some(r.acceleration),
            _ => None,
        }
    }

    pub fn battery_mv(&self) -> Option<u16> {
        match self {
            Self::RawV1(r) => Some(r.battery_mv),
            Self::RawV2(r) => Some(r.battery_mv),
            _ => None,
        }
    }

    pub fn tx_power_dbm(&self) -> Option<i8> {
        match self {
            Self::RawV2(r) => Some(r.tx_power_dbm),
            _ => None,
        }
    }
}

/// Decode RuuviTag manufacturer data, dispatching on the byte at index 2.
///
/// # Errors
///
/// - `PayloadTooShort` if the data is shorter than the format requires
/// - `UnknownFormat` if the discriminant is not 3 or 5
///
/// # Examples
///
/// ```
/// use tracker_link::sensor::decode_external_sensor;
///
/// let mut raw = [0u8; 20];
/// raw[2] = 5;
/// raw[3] = 0x00;
/// raw[4] = 0x64; // 100 * 0.005 = 0.5 °C
/// let reading = decode_external_sensor(&raw).unwrap();
/// assert!((reading.temperature().unwrap() - 0.5).abs() < 1e-9);
/// ```
pub fn decode_external_sensor(raw: &[u8]) -> Result<ExternalSensorReading, SensorError> {
    let format = *raw.get(FORMAT_OFFSET).ok_or(SensorError::PayloadTooShort {
        expected: FORMAT_OFFSET + 1,
        actual: raw.len(),
    })?;

    debug!(format, len = raw.len(), "Decoding external sensor payload");

    match format {
        FORMAT_RAW_V1 => decode_raw_v1(raw).map(ExternalSensorReading::RawV1),
        FORMAT_RAW_V2 => decode_raw_v2(raw).map(ExternalSensorReading::RawV2),
        other => Err(SensorError::UnknownFormat(other)),
    }
}

/// Decode manufacturer data, substituting [`ExternalSensorReading::Absent`]
/// for anything that fails to decode.
pub fn decode_or_absent(raw: &[u8]) -> ExternalSensorReading {
    absent_on_error(decode_external_sensor(raw))
}

/// Substitute [`ExternalSensorReading::Absent`] for a failed decode, with a
/// warning.
pub fn absent_on_error(result: Result<ExternalSensorReading, SensorError>) -> ExternalSensorReading {
    result.unwrap_or_else(|e| {
        warn!("External sensor payload not decoded, reporting absent: {}", e);
        ExternalSensorReading::Absent
    })
}

fn ensure_len(raw: &[u8], expected: usize) -> Result<(), SensorError> {
    if raw.len() < expected {
        return Err(SensorError::PayloadTooShort {
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

fn be_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

fn be_i16(raw: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([raw[at], raw[at + 1]])
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// RAWv1 temperature: integer byte plus hundredths byte, sign-magnitude.
///
/// A combined value above 128 encodes a negative temperature: 128 is
/// subtracted and the result negated (200, 0 -> -72.0). Exactly 128.0 is
/// left as is.
fn raw_v1_temperature(integer: u8, hundredths: u8) -> f64 {
    let temperature = integer as f64 + hundredths as f64 / 100.0;
    if temperature > 128.0 {
        round2(-(temperature - 128.0))
    } else {
        round2(temperature)
    }
}

fn decode_raw_v1(raw: &[u8]) -> Result<RawV1Reading, SensorError> {
    ensure_len(raw, RAW_V1_MIN_LEN)?;

    Ok(RawV1Reading {
        humidity: raw[3] as f64 / 2.0,
        temperature: raw_v1_temperature(raw[4], raw[5]),
        pressure: be_u16(raw, 6) as u32 + PRESSURE_OFFSET,
        acceleration: [be_i16(raw, 8), be_i16(raw, 10), be_i16(raw, 12)],
        battery_mv: be_u16(raw, 14),
    })
}

fn decode_raw_v2(raw: &[u8]) -> Result<RawV2Reading, SensorError> {
    ensure_len(raw, RAW_V2_MIN_LEN)?;

    // Power info: battery in the high 11 bits, tx power in the low 5 bits
    let power = be_u16(raw, 15);
    let battery_mv = power.field(5, 11)? + RAW_V2_BATTERY_OFFSET;
    let tx_power_dbm = (power.field(0, 5)? as i8) * 2 - 40;

    Ok(RawV2Reading {
        temperature: be_i16(raw, 3) as f64 * 0.005,
        humidity: be_u16(raw, 5) as f64 * 0.0025,
        pressure: be_u16(raw, 7) as u32 + PRESSURE_OFFSET,
        acceleration: [be_i16(raw, 9), be_i16(raw, 11), be_i16(raw, 13)],
        battery_mv,
        tx_power_dbm,
        movement_counter: raw[18],
        measurement_sequence: be_u16(raw, 18),
    })
}

/// Decode the base64 fragment of an Eddystone-URL beacon (formats 2 and 4).
///
/// The first 8 characters carry 6 bytes:
/// `[format, humidity*2, sign|temperature, hundredths, pressure_hi, pressure_lo]`.
/// A 9th character, when present, is the tag identifier.
///
/// Both the URL-safe and standard base64 alphabets are accepted.
pub fn decode_url_payload(encoded: &str) -> Result<ExternalSensorReading, SensorError> {
    if !encoded.is_ascii() || encoded.len() < URL_PAYLOAD_CHARS {
        return Err(SensorError::InvalidUrlPayload(format!(
            "expected at least {} ASCII characters, got {:?}",
            URL_PAYLOAD_CHARS, encoded
        )));
    }

    let (data, rest) = encoded.split_at(URL_PAYLOAD_CHARS);
    let identifier = rest.bytes().next();

    let normalized: String = data
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let decoded = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| SensorError::InvalidUrlPayload(e.to_string()))?;
    ensure_len(&decoded, 6)?;

    let format = decoded[0];
    if format != FORMAT_URL && format != FORMAT_URL_WITH_ID {
        return Err(SensorError::UnknownFormat(format));
    }

    let magnitude = decoded[2].field(0, 7)? as f64 + decoded[3] as f64 / 100.0;
    let temperature = if decoded[2].test_bit(7)? {
        round2(-magnitude)
    } else {
        round2(magnitude)
    };

    Ok(ExternalSensorReading::Url(UrlReading {
        format,
        humidity: decoded[1] as f64 / 2.0,
        temperature,
        pressure: be_u16(&decoded, 4) as u32 + PRESSURE_OFFSET,
        identifier,
    }))
}
