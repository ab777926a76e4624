//! Hardware collaborator seams.
//!
//! The loop owns its devices as explicit resource objects passed in at
//! construction; there are no ambient singletons. Raw wire protocols
//! live behind these traits, outside the core.

use serde::{Deserialize, Serialize};
use sun_geometry::ActuatorAngles;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("actuator channel error: {0}")]
    Channel(String),
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("sensor read failed: {0}")]
    Read(String),
}

/// Two-axis actuator. Inputs are pre-clamped by the mapper and parking
/// logic; implementations should defensively clamp anyway.
pub trait ActuatorDriver: Send {
    fn command(&mut self, angles: ActuatorAngles) -> Result<(), ActuatorError>;
}

/// Stand-in actuator for degraded mode, when the real channel cannot
/// be opened at startup. Status stays queryable; moves go nowhere.
pub struct NoopActuator;

impl ActuatorDriver for NoopActuator {
    fn command(&mut self, angles: ActuatorAngles) -> Result<(), ActuatorError> {
        debug!(axis_a = angles.axis_a, axis_b = angles.axis_b, "no-op actuator move");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PowerReading {
    pub voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
}

/// Temperature/humidity sensor. Best-effort: a failed read yields an
/// absent snapshot field, never a failed cycle.
pub trait EnvironmentSensor: Send {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError>;
}

/// Bus voltage/current sensor. Same best-effort contract.
pub trait PowerSensor: Send {
    fn read(&mut self) -> Result<PowerReading, SensorError>;
}
