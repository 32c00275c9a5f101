//! # Duty Cycle
//!
//! One wake cycle: sample every sensor, queue the telemetry frame, run one
//! session and report how long to sleep.
//!
//! Sensor failures never abort the cycle. Each failed reading is logged and
//! replaced by an absent value, and the frame is built from whatever was
//! available.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::frame::{ExternalFields, TelemetryFrame};
use crate::error::Result;
use crate::link::Connector;
use crate::logging::LogArchive;
use crate::sensor::tmp117::{limit_to_register, register_to_celsius};
use crate::sensor::{absent_on_error, decode_or_absent, decode_url_payload, ExternalSensorReading, SensorError, Tmp117Config};
use crate::session::{DeviceIdentity, SessionError, SessionReport, TelemetrySession};
use crate::store::{ByteStore, ConfigRecord, ConfigStore, FrameQueue};

/// GNSS position fix
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PositionFix {
    /// UTC time reported by the receiver, available even without a fix
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
}

/// Advertisement payload captured from a beacon
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconPayload {
    /// Manufacturer-specific data (formats 3 and 5)
    Manufacturer(Vec<u8>),
    /// Encoded Eddystone-URL fragment (formats 2 and 4)
    Url(String),
}

/// Raw beacon advertisement with the sender's unique id
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBeacon {
    pub uid: String,
    pub payload: BeaconPayload,
}

impl RawBeacon {
    /// Decode the payload, yielding `Absent` (with a warning) on failure
    pub fn decode(&self) -> ExternalSensorReading {
        match &self.payload {
            BeaconPayload::Manufacturer(data) => decode_or_absent(data),
            BeaconPayload::Url(encoded) => absent_on_error(decode_url_payload(encoded)),
        }
    }
}

/// Hardware collaborators sampled once per wake cycle.
pub trait SensorSuite {
    fn battery_voltage(&mut self) -> std::result::Result<f64, SensorError>;

    /// Wait up to `timeout` for a position fix
    fn position(&mut self, timeout: Duration) -> std::result::Result<PositionFix, SensorError>;

    /// x, y, z, roll, pitch
    fn acceleration(&mut self) -> std::result::Result<[f64; 5], SensorError>;

    fn temperatures(&mut self) -> std::result::Result<[Option<f64>; 4], SensorError>;

    /// Raw TMP117 configuration register. Reading it clears raised alerts.
    fn temperature_status(&mut self) -> std::result::Result<u16, SensorError>;

    /// Program the TMP117 with a configuration and limit registers
    fn arm_temperature_alert(
        &mut self,
        config: Tmp117Config,
        low: i16,
        high: i16,
    ) -> std::result::Result<(), SensorError>;

    /// Enable the accelerometer activity interrupt
    fn arm_activity_alert(&mut self, threshold_mg: u32, duration_ms: u32) -> std::result::Result<(), SensorError>;

    /// Scan up to `timeout` for the beacon with address `mac`
    fn external_sensor(&mut self, mac: &str, timeout: Duration) -> std::result::Result<Option<RawBeacon>, SensorError>;

    /// The wake was caused by the accelerometer
    fn woke_on_activity(&self) -> bool;
}

/// Fixed readings loaded from a JSON fixture, for host runs.
///
/// Readings left out of the fixture report [`SensorError::Unavailable`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticReadings {
    pub battery_voltage: Option<f64>,
    pub position: Option<PositionFix>,
    pub acceleration: Option<[f64; 5]>,
    pub temperatures: Option<[Option<f64>; 4]>,
    pub temperature_status: Option<u16>,
    pub beacon: Option<RawBeacon>,
    pub woke_on_activity: bool,
}

impl StaticReadings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn unavailable<T>(value: Option<T>, what: &str) -> std::result::Result<T, SensorError> {
    value.ok_or_else(|| SensorError::Unavailable(what.to_string()))
}

impl SensorSuite for StaticReadings {
    fn battery_voltage(&mut self) -> std::result::Result<f64, SensorError> {
        unavailable(self.battery_voltage, "battery")
    }

    fn position(&mut self, _timeout: Duration) -> std::result::Result<PositionFix, SensorError> {
        unavailable(self.position.clone(), "gnss")
    }

    fn acceleration(&mut self) -> std::result::Result<[f64; 5], SensorError> {
        unavailable(self.acceleration, "accelerometer")
    }

    fn temperatures(&mut self) -> std::result::Result<[Option<f64>; 4], SensorError> {
        unavailable(self.temperatures, "temperature sensors")
    }

    fn temperature_status(&mut self) -> std::result::Result<u16, SensorError> {
        unavailable(self.temperature_status, "tmp117")
    }

    fn arm_temperature_alert(
        &mut self,
        config: Tmp117Config,
        low: i16,
        high: i16,
    ) -> std::result::Result<(), SensorError> {
        debug!(config = config.raw(), low, high, "Temperature alert armed");
        Ok(())
    }

    fn arm_activity_alert(&mut self, threshold_mg: u32, duration_ms: u32) -> std::result::Result<(), SensorError> {
        debug!(threshold_mg, duration_ms, "Activity alert armed");
        Ok(())
    }

    fn external_sensor(&mut self, _mac: &str, _timeout: Duration) -> std::result::Result<Option<RawBeacon>, SensorError> {
        Ok(self.beacon.clone())
    }

    fn woke_on_activity(&self) -> bool {
        self.woke_on_activity
    }
}

/// Device identity plus the persistent stores
pub struct Device<Q, C, L> {
    pub identity: DeviceIdentity,
    pub queue: FrameQueue<Q>,
    pub config: ConfigStore<C>,
    pub logs: LogArchive<L>,
}

impl<Q: ByteStore, C: ByteStore, L: ByteStore> Device<Q, C, L> {
    pub fn session(&self, record: ConfigRecord) -> TelemetrySession<'_, Q, C, L> {
        TelemetrySession::new(&self.identity, &self.queue, &self.config, &self.logs, record)
    }
}

/// Result of one wake cycle
#[derive(Debug)]
pub struct CycleOutcome {
    /// Seconds to sleep before the next wake
    pub sleep_seconds: u32,
    pub frame: TelemetryFrame,
    /// The frame reached the queue
    pub queued: bool,
    pub session: std::result::Result<SessionReport, SessionError>,
}

/// Sample every sensor and build the telemetry frame. Also arms the
/// temperature and activity alerts the record enables.
pub fn sample<S: SensorSuite + ?Sized>(sensors: &mut S, record: &ConfigRecord) -> TelemetryFrame {
    let battery_voltage = sensors
        .battery_voltage()
        .map_err(|e| error!("Failed to read battery voltage: {}", e))
        .ok();

    let temperatures = sensors.temperatures().unwrap_or_else(|e| {
        error!("Failed to read temperature sensors: {}", e);
        [None; 4]
    });

    // Reading the status clears a raised alert, so re-arm only afterwards
    let status = sensors
        .temperature_status()
        .map(Tmp117Config::from_raw)
        .map_err(|e| error!("Failed to read temperature alert status: {}", e))
        .ok();
    let temperature_alert = status.map(Tmp117Config::any_alert).unwrap_or(false);

    if record.temp_alert_enabled {
        let low = limit_to_register(record.temp_alert_low);
        let high = limit_to_register(record.temp_alert_high);
        let armed = status
            .unwrap_or_default()
            .alert_armed()
            .map_err(SensorError::from)
            .and_then(|config| sensors.arm_temperature_alert(config, low, high));
        match armed {
            Ok(()) => debug!(
                low = register_to_celsius(low),
                high = register_to_celsius(high),
                "Armed temperature alert"
            ),
            Err(e) => error!("Failed to arm temperature alert: {}", e),
        }
    }

    let acceleration = match sensors.acceleration() {
        Ok(values) => values.map(Some),
        Err(e) => {
            error!("Failed to read accelerometer: {}", e);
            [None; 5]
        }
    };

    if record.acc_alert_enabled {
        if let Err(e) = sensors.arm_activity_alert(record.acc_alert_threshold, record.acc_alert_duration) {
            error!("Failed to arm activity alert: {}", e);
        }
    }

    let external = if record.ruuvi_enabled {
        let timeout = Duration::from_secs(u64::from(record.ruuvi_timeout));
        match sensors.external_sensor(&record.ruuvi_mac, timeout) {
            Ok(Some(beacon)) => ExternalFields::from_reading(&beacon.decode(), Some(&beacon.uid)),
            Ok(None) => {
                info!("Beacon {} not seen", record.ruuvi_mac);
                ExternalFields::default()
            }
            Err(e) => {
                error!("Failed to read external sensor: {}", e);
                ExternalFields::default()
            }
        }
    } else {
        ExternalFields::default()
    };

    let position = sensors
        .position(Duration::from_secs(u64::from(record.gps_timeout)))
        .unwrap_or_else(|e| {
            error!("Failed to read position: {}", e);
            PositionFix::default()
        });

    TelemetryFrame {
        timestamp: position.timestamp,
        latitude: position.latitude,
        longitude: position.longitude,
        course: position.course,
        speed: position.speed,
        battery_voltage,
        activity_alert: sensors.woke_on_activity(),
        acceleration,
        temperature_alert,
        temperatures,
        external,
    }
}

/// Run one wake cycle. Never fails; every error is logged and reflected in
/// the outcome.
pub async fn run_cycle<S, Q, C, L>(
    device: &Device<Q, C, L>,
    sensors: &mut S,
    record: ConfigRecord,
    connector: &dyn Connector,
) -> CycleOutcome
where
    S: SensorSuite + ?Sized,
    Q: ByteStore,
    C: ByteStore,
    L: ByteStore,
{
    let frame = sample(sensors, &record);

    let queued = match device.queue.append(&frame.encode()) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to queue telemetry frame: {}", e);
            false
        }
    };

    let mut session = device.session(record);
    let result = session.run(connector).await;

    let sleep_seconds = session.record().sleep_seconds;
    info!(sleep_seconds, "Wake cycle complete");

    CycleOutcome {
        sleep_seconds,
        frame,
        queued,
        session: result,
    }
}
