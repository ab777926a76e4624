//! Sun Geometry Library
//!
//! Wraps the astronomical sun-position algorithm and maps sky angles
//! onto the bounded two-axis actuator range.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use solar_positioning::{grena3, time::DeltaT, types::RefractionCorrection};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("coordinates out of range: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("sun position computation failed: {0}")]
    Solar(#[from] solar_positioning::Error),
}

pub type Result<T> = std::result::Result<T, GeometryError>;

/// Topocentric sun direction. Azimuth in degrees from north, altitude
/// in degrees above the horizon. Produced fresh every cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SunAngles {
    pub azimuth: f64,
    pub altitude: f64,
}

impl SunAngles {
    /// Altitude above zero means the sun is up; at or below means night.
    pub fn is_daytime(&self) -> bool {
        self.altitude > 0.0
    }
}

/// Commanded actuator position, both axes in degrees within [0, 180].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ActuatorAngles {
    pub axis_a: f64,
    pub axis_b: f64,
}

impl ActuatorAngles {
    pub fn new(axis_a: f64, axis_b: f64) -> Self {
        Self { axis_a, axis_b }
    }

    /// Saturate both axes into the mechanical range.
    pub fn clamped(self) -> Self {
        Self {
            axis_a: self.axis_a.clamp(0.0, 180.0),
            axis_b: self.axis_b.clamp(0.0, 180.0),
        }
    }

    pub fn in_range(&self) -> bool {
        (0.0..=180.0).contains(&self.axis_a) && (0.0..=180.0).contains(&self.axis_b)
    }
}

/// Compute the sun direction for a location and UTC instant.
///
/// Pure adapter over the Grena3 algorithm with estimated ΔT and
/// standard refraction; no I/O, deterministic per input.
pub fn sun_position(latitude: f64, longitude: f64, at: DateTime<Utc>) -> Result<SunAngles> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(GeometryError::InvalidCoordinates {
            latitude,
            longitude,
        });
    }

    let delta_t = DeltaT::estimate_from_date(at.year(), at.month())?;
    let position = grena3::solar_position(
        at,
        latitude,
        longitude,
        delta_t,
        Some(RefractionCorrection::standard()),
    )?;

    Ok(SunAngles {
        azimuth: position.azimuth(),
        altitude: position.elevation_angle(),
    })
}

/// Maps sun angles onto the actuator and owns the parked rest position.
///
/// The azimuth mapping folds the full 360° compass onto the 180°
/// mechanical range, compressed 2:1 around an east-referenced offset.
/// Lossy: the mount cannot wrap, so azimuths past the fold saturate.
#[derive(Debug, Clone, Copy)]
pub struct AngleMapper {
    azimuth_offset: f64,
    park: ActuatorAngles,
}

impl Default for AngleMapper {
    fn default() -> Self {
        Self {
            azimuth_offset: 90.0,
            park: ActuatorAngles::new(90.0, 45.0),
        }
    }
}

impl AngleMapper {
    pub fn new(azimuth_offset: f64, park: ActuatorAngles) -> Self {
        Self {
            azimuth_offset,
            park: park.clamped(),
        }
    }

    /// Convert a daytime sun direction into actuator angles.
    pub fn to_actuator(&self, sun: SunAngles) -> ActuatorAngles {
        let mut azimuth = sun.azimuth;
        if azimuth < 0.0 {
            azimuth += 360.0;
        }
        let axis_a = ((azimuth - self.azimuth_offset) / 2.0 + 90.0).clamp(0.0, 180.0);
        let axis_b = sun.altitude.clamp(0.0, 90.0);
        ActuatorAngles::new(axis_a, axis_b)
    }

    /// Fixed rest position commanded at night and at startup.
    pub fn parked(&self) -> ActuatorAngles {
        self.park
    }
}
