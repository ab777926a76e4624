//! Position Source Library
//!
//! Resolves one geolocated, time-stamped fix per control cycle from an
//! ordered fallback chain: live receiver, cached coordinates, backup clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod cache;
mod chain;
mod nmea;

pub use cache::{CacheRecord, PositionCache};
pub use chain::PositionChain;
pub use nmea::{frame_sentence, sentence_checksum};

#[derive(Error, Debug)]
pub enum PositionError {
    #[error("no position source available: live acquisition failed and no cached coordinates exist")]
    NoPositionSource,
    #[error("backup clock supplied {clock_time} but no cached coordinates exist")]
    NoCachedCoordinates { clock_time: DateTime<Utc> },
    #[error("backup clock read failed: {0}")]
    Clock(#[from] ClockError),
}

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("receiver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("receiver unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("clock bus error: {0}")]
    Bus(String),
    #[error("clock returned an invalid datetime")]
    InvalidDatetime,
}

pub type Result<T> = std::result::Result<T, PositionError>;

/// Provenance of a resolved fix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FixSource {
    /// Obtained from the live receiver this cycle.
    Live,
    /// Cached coordinates reused with the current wall-clock time.
    Cached,
    /// Timestamp from the backup clock only. The chain never points the
    /// actuator from this stage (coordinates are mandatory); the variant
    /// exists so degraded status reports can name the stage that ran.
    ClockOnly,
}

/// One resolved position + time, produced at most once per cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoFix {
    /// Degrees, [-90, 90].
    pub latitude: f64,
    /// Degrees, [-180, 180].
    pub longitude: f64,
    /// Always UTC.
    pub timestamp: DateTime<Utc>,
    pub source: FixSource,
}

/// Stream of raw sentence bytes from the location receiver.
///
/// Implementations block for at most `timeout` and return however many
/// bytes arrived in that window (possibly zero). The chain owns the
/// overall acquisition deadline.
pub trait SentenceSource: Send {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, ReceiverError>;
}

/// Battery-backed real-time clock, consulted when no other time source holds.
pub trait BackupClock: Send {
    fn read_utc_time(&mut self) -> std::result::Result<DateTime<Utc>, ClockError>;
}

/// Wall-clock seam so cycle logic can be driven deterministically in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock. Default time source everywhere outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
