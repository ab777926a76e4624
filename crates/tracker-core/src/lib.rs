//! Tracker Core Library
//!
//! The control loop that points a two-axis actuator at the sun:
//! position resolution, angle mapping, auto/manual arbitration, and
//! atomically-published status snapshots.

mod arbiter;
mod hardware;
mod status;
mod tracker;

pub use arbiter::{ArbiterMode, OverrideArbiter};
pub use hardware::{
    ActuatorDriver, ActuatorError, EnvironmentReading, EnvironmentSensor, NoopActuator,
    PowerReading, PowerSensor, SensorError,
};
pub use status::{SharedStatus, StatusSnapshot, TrackerMode};
pub use tracker::{Tracker, TrackerShared};
