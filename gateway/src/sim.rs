//! Simulated hardware collaborators.
//!
//! Stand-ins for the serial receiver, RTC, actuator channel, and aux
//! sensors so the gateway runs end-to-end on any machine. The receiver
//! emits properly framed RMC sentences for a configured location.

use chrono::{Datelike, Timelike, Utc};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::Duration;
use tracing::info;

use position_source::{
    frame_sentence, BackupClock, ClockError, ReceiverError, SentenceSource,
};
use sun_geometry::ActuatorAngles;
use tracker_core::{
    ActuatorDriver, ActuatorError, EnvironmentReading, EnvironmentSensor, PowerReading,
    PowerSensor, SensorError,
};

/// Emits one valid RMC sentence roughly per read, timestamped now.
pub struct SimReceiver {
    latitude: f64,
    longitude: f64,
    pending: VecDeque<u8>,
}

impl SimReceiver {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            pending: VecDeque::new(),
        }
    }

    fn next_sentence(&self) -> String {
        let now = Utc::now();
        let (lat, lat_hemi) = nmea_latitude(self.latitude);
        let (lon, lon_hemi) = nmea_longitude(self.longitude);
        let body = format!(
            "GPRMC,{:02}{:02}{:02}.00,A,{},{},{},{},0.0,0.0,{:02}{:02}{:02},,,A",
            now.hour(),
            now.minute(),
            now.second(),
            lat,
            lat_hemi,
            lon,
            lon_hemi,
            now.day(),
            now.month(),
            now.year() % 100,
        );
        frame_sentence(&body)
    }
}

impl SentenceSource for SimReceiver {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ReceiverError> {
        // Pace like a slow serial device without eating the whole window.
        std::thread::sleep(timeout.min(Duration::from_millis(100)));
        if self.pending.is_empty() {
            self.pending.extend(self.next_sentence().into_bytes());
        }
        let mut count = 0;
        while count < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

/// Degrees to the receiver's ddmm.mmm convention.
fn nmea_latitude(value: f64) -> (String, char) {
    let hemisphere = if value >= 0.0 { 'N' } else { 'S' };
    let value = value.abs();
    let degrees = value.trunc() as u32;
    let minutes = (value - value.trunc()) * 60.0;
    (format!("{degrees:02}{minutes:06.3}"), hemisphere)
}

fn nmea_longitude(value: f64) -> (String, char) {
    let hemisphere = if value >= 0.0 { 'E' } else { 'W' };
    let value = value.abs();
    let degrees = value.trunc() as u32;
    let minutes = (value - value.trunc()) * 60.0;
    (format!("{degrees:03}{minutes:06.3}"), hemisphere)
}

/// Backup clock backed by the host clock.
pub struct SystemBackupClock;

impl BackupClock for SystemBackupClock {
    fn read_utc_time(&mut self) -> Result<chrono::DateTime<Utc>, ClockError> {
        Ok(Utc::now())
    }
}

/// Actuator that just logs every commanded move.
pub struct LoggingActuator;

impl ActuatorDriver for LoggingActuator {
    fn command(&mut self, angles: ActuatorAngles) -> Result<(), ActuatorError> {
        let angles = angles.clamped();
        info!(
            axis_a = format_args!("{:.1}", angles.axis_a),
            axis_b = format_args!("{:.1}", angles.axis_b),
            "actuator move"
        );
        Ok(())
    }
}

fn diurnal_phase() -> f64 {
    (Utc::now().timestamp().rem_euclid(86_400)) as f64 / 86_400.0 * TAU
}

pub struct SimEnvironmentSensor;

impl EnvironmentSensor for SimEnvironmentSensor {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        let phase = diurnal_phase();
        Ok(EnvironmentReading {
            temperature_c: 24.0 + 3.0 * phase.sin(),
            humidity_pct: 50.0 - 5.0 * phase.sin(),
        })
    }
}

pub struct SimPowerSensor;

impl PowerSensor for SimPowerSensor {
    fn read(&mut self) -> Result<PowerReading, SensorError> {
        let phase = diurnal_phase();
        let voltage_v = 5.0 + 0.2 * phase.sin();
        let current_a = 0.45 + 0.05 * phase.cos();
        Ok(PowerReading {
            voltage_v,
            current_a,
            power_w: voltage_v * current_a,
        })
    }
}
