//! Durable last-known-good coordinate store.
//!
//! A single JSON record, overwritten on every successful live fix and
//! read back at startup and on every fallback. Load failures of any
//! kind are treated as "no cache"; the record is never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub saved_at: DateTime<Utc>,
}

pub struct PositionCache {
    path: PathBuf,
}

impl PositionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted record. Missing or corrupt files yield `None`.
    pub fn load(&self) -> Option<CacheRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cache file");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<CacheRecord>(&raw) {
            Ok(record) => {
                debug!(
                    latitude = record.latitude,
                    longitude = record.longitude,
                    "cache loaded"
                );
                Some(record)
            }
            Err(err) => {
                // Partial/corrupt writes are treated as absent, not fatal.
                warn!(path = %self.path.display(), error = %err, "cache record corrupt");
                None
            }
        }
    }

    /// Overwrite the record. Callers log failures and continue; the
    /// previous on-disk value stays authoritative for later fallbacks.
    pub fn save(&self, record: &CacheRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(record)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&self.path, body)
    }
}
