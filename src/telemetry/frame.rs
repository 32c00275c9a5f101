//! Telemetry frame model.

use chrono::{DateTime, Utc};

use crate::sensor::ExternalSensorReading;
use crate::wire::decoder::decode_telemetry;
use crate::wire::encoder::encode_telemetry;
use crate::wire::protocol::is_field_safe;
use crate::wire::FrameError;

/// External (beacon) sensor fields of a telemetry frame.
///
/// `sensor_type` is the beacon format code, 0 when no reading was available.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalFields {
    pub sensor_type: u8,
    pub uid: Option<String>,
    pub acceleration: [Option<i16>; 3],
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub pressure: Option<u32>,
    pub battery_mv: Option<u16>,
    pub tx_power_dbm: Option<i8>,
}

impl ExternalFields {
    /// Flatten a decoded beacon reading into wire fields.
    ///
    /// An absent reading yields all-empty fields and drops the uid. A uid
    /// that is not printable ASCII or contains the field separator is
    /// dropped too.
    pub fn from_reading(reading: &ExternalSensorReading, uid: Option<&str>) -> Self {
        if reading.is_absent() {
            return Self::default();
        }

        let acceleration = reading
            .acceleration()
            .map(|[x, y, z]| [Some(x), Some(y), Some(z)])
            .unwrap_or_default();

        Self {
            sensor_type: reading.format(),
            uid: uid.filter(|uid| is_field_safe(uid)).map(str::to_string),
            acceleration,
            humidity: reading.humidity(),
            temperature: reading.temperature(),
            pressure: reading.pressure(),
            battery_mv: reading.battery_mv(),
            tx_power_dbm: reading.tx_power_dbm(),
        }
    }
}

/// One wake cycle's worth of telemetry.
///
/// Built once and never mutated after it is queued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryFrame {
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Course over ground, degrees
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub battery_voltage: Option<f64>,
    /// Device woke because the accelerometer crossed its threshold
    pub activity_alert: bool,
    /// x, y, z, roll, pitch
    pub acceleration: [Option<f64>; 5],
    pub temperature_alert: bool,
    pub temperatures: [Option<f64>; 4],
    pub external: ExternalFields,
}

impl TelemetryFrame {
    /// Serialized form, the unit stored in the queue
    pub fn encode(&self) -> Vec<u8> {
        encode_telemetry(self)
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, FrameError> {
        decode_telemetry(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::ruuvi::{RawV1Reading, UrlReading};

    #[test]
    fn test_from_absent_reading() {
        let fields = ExternalFields::from_reading(&ExternalSensorReading::Absent, Some("AABB"));
        assert_eq!(fields, ExternalFields::default());
        assert_eq!(fields.sensor_type, 0);
    }

    #[test]
    fn test_from_url_reading_has_no_motion_fields() {
        let reading = ExternalSensorReading::Url(UrlReading {
            format: 4,
            humidity: 35.0,
            temperature: -1.25,
            pressure: 99_500,
            identifier: Some(b'A'),
        });
        let fields = ExternalFields::from_reading(&reading, Some("AABBCCDDEEFF"));
        assert_eq!(fields.sensor_type, 4);
        assert_eq!(fields.acceleration, [None, None, None]);
        assert_eq!(fields.battery_mv, None);
        assert_eq!(fields.temperature, Some(-1.25));
        assert_eq!(fields.uid.as_deref(), Some("AABBCCDDEEFF"));
    }

    #[test]
    fn test_unsafe_uid_is_dropped() {
        let reading = ExternalSensorReading::RawV1(RawV1Reading {
            humidity: 40.0,
            temperature: 21.0,
            pressure: 100_000,
            acceleration: [0, 0, 1000],
            battery_mv: 3000,
        });
        assert_eq!(ExternalFields::from_reading(&reading, Some("AA,BB")).uid, None);
        assert_eq!(ExternalFields::from_reading(&reading, Some("t\u{e4}g")).uid, None);

        let frame = TelemetryFrame {
            external: ExternalFields::from_reading(&reading, Some("AA,BB")),
            ..Default::default()
        };
        assert_eq!(TelemetryFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_from_raw_v1_reading() {
        let reading = ExternalSensorReading::RawV1(RawV1Reading {
            humidity: 20.5,
            temperature: -72.0,
            pressure: 100_000,
            acceleration: [1, 2, 3],
            battery_mv: 2900,
        });
        let fields = ExternalFields::from_reading(&reading, None);
        assert_eq!(fields.sensor_type, 3);
        assert_eq!(fields.acceleration, [Some(1), Some(2), Some(3)]);
        assert_eq!(fields.battery_mv, Some(2900));
        assert_eq!(fields.tx_power_dbm, None);
        assert_eq!(fields.uid, None);
    }

    #[test]
    fn test_frame_encode_decode() {
        let frame = TelemetryFrame {
            latitude: Some(52.52),
            longitude: Some(13.405),
            battery_voltage: Some(3.7),
            temperatures: [Some(8.0), None, None, None],
            ..Default::default()
        };
        assert_eq!(TelemetryFrame::decode(&frame.encode()).unwrap(), frame);
    }
}
