//! Status snapshot publication.
//!
//! One immutable snapshot per cycle, swapped in whole so readers never
//! observe a partially updated view.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use position_source::GeoFix;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sun_geometry::{ActuatorAngles, SunAngles};

use crate::hardware::{EnvironmentReading, PowerReading};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackerMode {
    /// No cycle has completed yet.
    Idle,
    /// Tracking the computed sun position.
    Auto,
    /// Sun below the horizon, actuator parked.
    Night,
    /// Operator override in effect.
    Manual,
    /// Position could not be resolved; holding the last safe position.
    Error,
}

/// The only view exposed to external consumers. Rebuilt every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub angles: ActuatorAngles,
    pub mode: TrackerMode,
    pub fix: Option<GeoFix>,
    pub sun: Option<SunAngles>,
    pub environment: Option<EnvironmentReading>,
    pub power: Option<PowerReading>,
    pub last_update: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn idle(angles: ActuatorAngles, at: DateTime<Utc>) -> Self {
        Self {
            angles,
            mode: TrackerMode::Idle,
            fix: None,
            sun: None,
            environment: None,
            power: None,
            last_update: at,
        }
    }
}

/// Copy-on-publish snapshot cell. Writers build a complete snapshot
/// and swap the reference; readers clone an `Arc` and walk away.
pub struct SharedStatus {
    latest: RwLock<Arc<StatusSnapshot>>,
}

impl SharedStatus {
    pub fn new(initial: StatusSnapshot) -> Self {
        Self {
            latest: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        *self.latest.write() = Arc::new(snapshot);
    }

    pub fn latest(&self) -> Arc<StatusSnapshot> {
        self.latest.read().clone()
    }
}
