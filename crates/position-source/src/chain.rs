//! Ordered, short-circuiting position resolution.
//!
//! Live acquisition is attempted first on every cycle when a receiver
//! is configured; the cache is a resilience fallback, not a cost
//! optimization. The acquisition timeout is a hard wall: garbled or
//! partial sentences are discarded without resetting it.

use chrono::{DateTime, Utc};
use nmea0183::{ParseResult, Parser};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheRecord, PositionCache};
use crate::nmea::fix_from_rmc;
use crate::{
    BackupClock, FixSource, GeoFix, PositionError, Result, SentenceSource, SystemClock, TimeSource,
};

pub struct PositionChain {
    receiver: Option<Box<dyn SentenceSource>>,
    clock: Option<Box<dyn BackupClock>>,
    cache: PositionCache,
    cached: Option<CacheRecord>,
    fix_timeout: Duration,
    time: Arc<dyn TimeSource>,
}

impl PositionChain {
    /// Build a chain with only the cache stage enabled. The cache is
    /// read once up front; fallbacks re-read it if this copy is empty.
    pub fn new(cache: PositionCache, fix_timeout: Duration) -> Self {
        let cached = cache.load();
        Self {
            receiver: None,
            clock: None,
            cache,
            cached,
            fix_timeout,
            time: Arc::new(SystemClock),
        }
    }

    pub fn with_receiver(mut self, receiver: Box<dyn SentenceSource>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_backup_clock(mut self, clock: Box<dyn BackupClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Last known coordinates, if any stage has ever produced them.
    pub fn cached_record(&self) -> Option<CacheRecord> {
        self.cached
    }

    /// The live-acquisition deadline. Callers sizing their own cycle
    /// budgets start from this.
    pub fn fix_timeout(&self) -> Duration {
        self.fix_timeout
    }

    /// Produce exactly one fix for this cycle, or fail the cycle.
    pub fn resolve(&mut self) -> Result<GeoFix> {
        // Stage 1: live acquisition.
        if let Some(receiver) = self.receiver.as_mut() {
            if let Some((latitude, longitude, timestamp)) =
                Self::acquire_live(receiver.as_mut(), self.fix_timeout)
            {
                info!(latitude, longitude, %timestamp, "live fix acquired");
                let record = CacheRecord {
                    latitude,
                    longitude,
                    saved_at: self.time.now(),
                };
                if let Err(err) = self.cache.save(&record) {
                    // Non-fatal: the in-memory record still serves this
                    // process; the previous on-disk record stays valid.
                    warn!(error = %err, "cache write failed");
                }
                self.cached = Some(record);
                return Ok(GeoFix {
                    latitude,
                    longitude,
                    timestamp,
                    source: FixSource::Live,
                });
            }
            warn!(timeout = ?self.fix_timeout, "live acquisition timed out");
        }

        // Stage 2: cached coordinates with the current wall-clock time.
        if self.cached.is_none() {
            self.cached = self.cache.load();
        }
        if let Some(record) = self.cached {
            info!(
                latitude = record.latitude,
                longitude = record.longitude,
                "using cached coordinates"
            );
            return Ok(GeoFix {
                latitude: record.latitude,
                longitude: record.longitude,
                timestamp: self.time.now(),
                source: FixSource::Cached,
            });
        }

        // Stage 3: backup clock. Time alone cannot aim the actuator, so
        // this stage always fails the cycle; it only distinguishes "we
        // at least know what time it is" from total darkness.
        match self.clock.as_mut() {
            Some(clock) => {
                let clock_time = clock.read_utc_time()?;
                warn!(%clock_time, "backup clock read but no cached coordinates; holding");
                Err(PositionError::NoCachedCoordinates { clock_time })
            }
            None => Err(PositionError::NoPositionSource),
        }
    }

    fn acquire_live(
        receiver: &mut dyn SentenceSource,
        fix_timeout: Duration,
    ) -> Option<(f64, f64, DateTime<Utc>)> {
        let deadline = Instant::now() + fix_timeout;
        let mut parser = Parser::new();
        let mut buf = [0u8; 256];

        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let read = match receiver.read(&mut buf, remaining) {
                Ok(read) => read,
                Err(err) => {
                    debug!(error = %err, "receiver read failed");
                    continue;
                }
            };

            for &byte in &buf[..read] {
                match parser.parse_from_byte(byte) {
                    Some(Ok(ParseResult::RMC(Some(rmc)))) => {
                        if let Some(fix) = fix_from_rmc(&rmc) {
                            return Some(fix);
                        }
                    }
                    // Void fixes, other sentence types, and garbled
                    // bytes are all skipped; the deadline keeps running.
                    _ => {}
                }
            }
        }
    }
}
