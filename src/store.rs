//! Persisted per-feed idempotency records
//!
//! Each feed's conversion record lives at
//! `{output_dir}/{partition}/{feed_id}/record.json`. The record's presence
//! and content — not just its existence — decide whether a later run skips
//! the feed, resets it, or treats it as fresh. Records are written via a
//! temp-file rename so a torn write reads as absent, never as truth.

use crate::config::Config;
use crate::types::{ConversionRecord, FeedKey, RECORD_SCHEMA_VERSION};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Record file name inside each feed directory
pub const RECORD_FILE: &str = "record.json";

/// What to do with a feed before any work starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A complete record exists; do not touch the network
    Skip,
    /// A record exists but is corrupt or reports failures; discard the
    /// feed's artifacts and reprocess from scratch
    Reset,
    /// No record exists
    Fresh,
}

/// Filesystem-backed store of conversion records
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    output_dir: PathBuf,
}

impl IdempotencyStore {
    /// Create a store rooted at the configured output directory
    pub fn new(config: &Config) -> Self {
        Self {
            output_dir: config.download.output_dir.clone(),
        }
    }

    /// Directory holding a feed's artifacts and record
    pub fn feed_dir(&self, key: &FeedKey) -> PathBuf {
        self.output_dir.join(&key.partition).join(&key.feed_id)
    }

    /// Path of a feed's record file
    pub fn record_path(&self, key: &FeedKey) -> PathBuf {
        self.feed_dir(key).join(RECORD_FILE)
    }

    /// Decide skip / reset / fresh for a feed key.
    ///
    /// Corruption at any level (unreadable file, invalid JSON, wrong schema
    /// version) maps to [`Decision::Reset`], never to an error.
    pub fn lookup(&self, key: &FeedKey) -> Decision {
        let path = self.record_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Decision::Fresh,
            Err(e) => {
                warn!(feed = %key, error = %e, "record unreadable, resetting feed");
                return Decision::Reset;
            }
        };

        let record: ConversionRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(feed = %key, error = %e, "record corrupt, resetting feed");
                return Decision::Reset;
            }
        };

        if record.schema_version != RECORD_SCHEMA_VERSION {
            debug!(
                feed = %key,
                version = record.schema_version,
                "record written by incompatible version, resetting feed"
            );
            return Decision::Reset;
        }

        if record.is_complete() {
            Decision::Skip
        } else {
            Decision::Reset
        }
    }

    /// Persist a feed's record, returning whether the write succeeded.
    ///
    /// I/O errors are reported as `false` rather than propagated — losing a
    /// record must not crash an otherwise-successful conversion. The caller
    /// discards produced artifacts when this returns `false`.
    pub fn persist(&self, key: &FeedKey, record: &ConversionRecord) -> bool {
        match self.try_persist(key, record) {
            Ok(()) => {
                debug!(feed = %key, "conversion record persisted");
                true
            }
            Err(e) => {
                warn!(feed = %key, error = %e, "failed to persist conversion record");
                false
            }
        }
    }

    fn try_persist(&self, key: &FeedKey, record: &ConversionRecord) -> std::io::Result<()> {
        let dir = self.feed_dir(key);
        std::fs::create_dir_all(&dir)?;

        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| std::io::Error::other(format!("record serialization failed: {e}")))?;

        // Write-then-rename keeps the record all-or-nothing
        let tmp = dir.join(format!("{RECORD_FILE}.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.record_path(key))?;
        Ok(())
    }

    /// Remove a feed's directory and everything in it (artifacts, record,
    /// extraction leftovers). Used on the `Reset` path and when an
    /// unrecorded success must be discarded.
    pub fn discard(&self, key: &FeedKey) {
        let dir = self.feed_dir(key);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(feed = %key, error = %e, "failed to discard feed directory");
            }
        }
    }
}

/// Remove a file if present, ignoring a missing file
pub(crate) fn remove_file_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> IdempotencyStore {
        let mut config = Config::default();
        config.download.output_dir = dir.path().to_path_buf();
        IdempotencyStore::new(&config)
    }

    fn record(converted: u32, failed: u32) -> ConversionRecord {
        ConversionRecord {
            schema_version: RECORD_SCHEMA_VERSION,
            feed_id: "mdb-1".to_string(),
            provider: "p".to_string(),
            partition: "AT".to_string(),
            members_converted: converted,
            failed_members: (0..failed)
                .map(|i| crate::types::MemberFailure {
                    member: format!("m{i}.txt"),
                    error: "boom".to_string(),
                })
                .collect(),
            original_size_bytes: 10,
            converted_size_bytes: 5,
            compression_ratio_pct: 50.0,
            artifacts: vec![],
            converted_at: Utc::now(),
        }
    }

    #[test]
    fn missing_record_is_fresh() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.lookup(&FeedKey::new("AT", "mdb-1")), Decision::Fresh);
    }

    #[test]
    fn complete_record_is_skip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");
        assert!(store.persist(&key, &record(3, 0)));
        assert_eq!(store.lookup(&key), Decision::Skip);
    }

    #[test]
    fn record_with_failed_members_is_reset() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");
        assert!(store.persist(&key, &record(2, 1)));
        assert_eq!(store.lookup(&key), Decision::Reset);
    }

    #[test]
    fn record_with_zero_converted_is_reset() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");
        assert!(store.persist(&key, &record(0, 0)));
        assert_eq!(store.lookup(&key), Decision::Reset);
    }

    #[test]
    fn truncated_record_is_reset_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");
        assert!(store.persist(&key, &record(3, 0)));

        // Simulate a torn write by truncating the persisted record
        let path = store.record_path(&key);
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() / 2]).unwrap();

        assert_eq!(store.lookup(&key), Decision::Reset);
    }

    #[test]
    fn wrong_schema_version_is_reset() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");
        let mut old = record(3, 0);
        old.schema_version = RECORD_SCHEMA_VERSION + 1;
        assert!(store.persist(&key, &old));
        assert_eq!(store.lookup(&key), Decision::Reset);
    }

    #[test]
    fn discard_removes_the_whole_feed_dir() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");
        assert!(store.persist(&key, &record(3, 0)));
        std::fs::write(store.feed_dir(&key).join("stops.colz"), b"x").unwrap();

        store.discard(&key);
        assert!(!store.feed_dir(&key).exists());
        assert_eq!(store.lookup(&key), Decision::Fresh);
    }

    #[test]
    fn persist_failure_returns_false() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let key = FeedKey::new("AT", "mdb-1");

        // Make the feed path unusable: a regular file where the partition
        // directory should be
        std::fs::write(dir.path().join("AT"), b"not a dir").unwrap();

        assert!(!store.persist(&key, &record(3, 0)));
    }
}
