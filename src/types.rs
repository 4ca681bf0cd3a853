//! Core types for gtfs-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Current schema version for persisted conversion records.
///
/// Bumped whenever the on-disk shape of [`ConversionRecord`] changes, so a
/// record written by an incompatible version reads as corrupt (`Reset`)
/// instead of being silently misinterpreted.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Unique handle for a feed: `partition:feed_id`.
///
/// Used for in-flight deduplication and idempotency lookups. Two feeds with
/// the same key are the same feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    /// Partition (country) code, uppercased
    pub partition: String,
    /// Provider-assigned feed identifier
    pub feed_id: String,
}

impl FeedKey {
    /// Build a key from a partition code and feed id
    pub fn new(partition: impl Into<String>, feed_id: impl Into<String>) -> Self {
        Self {
            partition: partition.into().to_uppercase(),
            feed_id: feed_id.into(),
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.feed_id)
    }
}

/// One provider's data archive within a partition.
///
/// Immutable once produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Provider-assigned feed identifier
    pub id: String,
    /// Transit operator / data provider name
    pub provider: String,
    /// Partition (country) code the feed belongs to
    pub partition: String,
    /// Archive download URL. Absence means the feed cannot be processed.
    pub download_url: Option<String>,
}

impl Feed {
    /// The feed's unique key (`partition:feed_id`)
    pub fn key(&self) -> FeedKey {
        FeedKey::new(self.partition.clone(), self.id.clone())
    }
}

/// Why a feed was skipped without touching the archive endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The directory entry carries no archive URL
    NoDownloadUrl,
    /// A prior run already converted this feed with zero member failures
    AlreadyConverted,
    /// The same key is being processed by another task in this run
    AlreadyInProgress,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoDownloadUrl => write!(f, "no download URL"),
            SkipReason::AlreadyConverted => write!(f, "already converted"),
            SkipReason::AlreadyInProgress => write!(f, "already in progress"),
        }
    }
}

/// Terminal outcome of processing one feed in one run
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    /// Every qualifying member converted, none failed
    Success {
        /// Feed key
        key: FeedKey,
        /// Size of the downloaded archive in bytes
        downloaded_bytes: u64,
        /// Total size of the columnar artifacts in bytes
        converted_bytes: u64,
        /// Number of members converted
        members_converted: u32,
    },
    /// At least one member converted and at least one failed.
    ///
    /// The feed stays eligible for full reprocessing on the next run.
    Partial {
        /// Feed key
        key: FeedKey,
        /// Size of the downloaded archive in bytes
        downloaded_bytes: u64,
        /// Total size of the columnar artifacts in bytes
        converted_bytes: u64,
        /// Number of members converted
        members_converted: u32,
        /// Number of members that failed to convert
        members_failed: u32,
    },
    /// Nothing usable was produced
    Failed {
        /// Feed key
        key: FeedKey,
        /// Why the feed failed, for attribution in the final report
        reason: String,
    },
    /// The feed was not processed at all
    Skipped {
        /// Feed key
        key: FeedKey,
        /// Why the feed was skipped
        reason: SkipReason,
    },
}

impl FeedOutcome {
    /// The key of the feed this outcome belongs to
    pub fn key(&self) -> &FeedKey {
        match self {
            FeedOutcome::Success { key, .. }
            | FeedOutcome::Partial { key, .. }
            | FeedOutcome::Failed { key, .. }
            | FeedOutcome::Skipped { key, .. } => key,
        }
    }
}

/// A member that failed to convert, as persisted in the conversion record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    /// Archive member name (e.g., "stop_times.txt")
    pub member: String,
    /// Converter error text
    pub error: String,
}

/// Persisted per-feed conversion record — the durable unit of idempotency.
///
/// Its presence *and content* decide how the next run treats the feed:
/// zero failed members means done, anything else (including an unreadable
/// record) means discard artifacts and reprocess from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    /// Record schema version, see [`RECORD_SCHEMA_VERSION`]
    pub schema_version: u32,
    /// Provider-assigned feed identifier
    pub feed_id: String,
    /// Transit operator / data provider name
    pub provider: String,
    /// Partition (country) code
    pub partition: String,
    /// Number of members successfully converted
    pub members_converted: u32,
    /// Members that failed to convert
    #[serde(default)]
    pub failed_members: Vec<MemberFailure>,
    /// Size of the original archive in bytes
    pub original_size_bytes: u64,
    /// Total size of the columnar artifacts in bytes
    pub converted_size_bytes: u64,
    /// `(original - converted) / original`, as a percentage; 0 when the
    /// original size is 0
    pub compression_ratio_pct: f64,
    /// Artifact file names produced in the feed directory
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// When the conversion finished
    pub converted_at: DateTime<Utc>,
}

impl ConversionRecord {
    /// True when the record describes a fully successful conversion
    /// (at least one member converted, none failed)
    pub fn is_complete(&self) -> bool {
        self.members_converted > 0 && self.failed_members.is_empty()
    }
}

/// Per-partition slice of the final report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionStats {
    /// Feeds that produced artifacts (success + partial)
    pub feeds: u32,
    /// Total columnar artifact bytes for the partition
    pub converted_bytes: u64,
}

/// Aggregate statistics over a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Feeds that reached a terminal state
    pub total: u32,
    /// Fully successful conversions (zero member failures)
    pub success: u32,
    /// Conversions with at least one member failure
    pub partial: u32,
    /// Feeds that produced nothing usable
    pub failed: u32,
    /// Feeds skipped (no URL, already converted, duplicate in-flight)
    pub skipped: u32,
    /// Archive bytes transferred for success + partial feeds
    pub downloaded_bytes: u64,
    /// Columnar artifact bytes for success + partial feeds
    pub converted_bytes: u64,
    /// `downloaded_bytes - converted_bytes` (can be negative when the
    /// columnar form is larger than the archive)
    pub space_saved_bytes: i64,
    /// Overall `(downloaded - converted) / downloaded` as a percentage;
    /// 0 when nothing was downloaded
    pub compression_ratio_pct: f64,
    /// Per-partition breakdown
    pub by_partition: HashMap<String, PartitionStats>,
}
