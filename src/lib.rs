//! # gtfs-harvest
//!
//! Resilient concurrent ingestion of GTFS feed archives.
//!
//! The engine discovers feeds through a paginated directory API, downloads
//! their archives under strict concurrency and rate limits, and converts
//! each tabular member into a compressed columnar artifact while tolerating
//! partial corruption. Runs are safely repeatable: per-feed idempotency
//! records let an interrupted run resume without re-downloading completed
//! work or silently skipping broken work.
//!
//! ## Design Philosophy
//!
//! - **Failures stay local** — a malformed row never fails its member, a
//!   broken member never fails its feed, a dead partition never fails the
//!   run; only authentication failure is fatal
//! - **Re-runnable by construction** — every feed carries a durable
//!   conversion record; anything less than a complete record means the
//!   feed restarts from scratch
//! - **Library-first** — no CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use gtfs_harvest::{Config, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.api.refresh_token = Some("refresh-token".to_string());
//!     config.partitions = vec!["AT".to_string(), "DE".to_string()];
//!
//!     let harvester = Harvester::new(config)?;
//!     let stats = harvester.run().await?;
//!
//!     println!(
//!         "{} feeds: {} ok, {} partial, {} failed, {} skipped",
//!         stats.total, stats.success, stats.partial, stats.failed, stats.skipped
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Known limitation
//!
//! Deduplication and idempotency hold within a single process only. Running
//! several harvester processes against the same output tree can race on the
//! idempotency records; an external lock service (or compare-and-set on the
//! record itself) would be required for that deployment shape.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Directory API authentication
pub mod auth;
/// Configuration types
pub mod config;
/// Download coordination (admission control, dedup, retry)
pub mod coordinator;
/// Tabular-to-columnar conversion capability
pub mod convert;
/// Paginated multi-partition feed discovery
pub mod directory;
/// Error types
pub mod error;
/// Run driver tying the components together
pub mod harvester;
/// Extract / convert / persist pipeline
pub mod pipeline;
/// Run statistics aggregation
pub mod report;
/// Retry logic with exponential backoff
pub mod retry;
/// Persisted per-feed idempotency records
pub mod store;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, Config, ConversionConfig, DownloadConfig, RetryConfig};
pub use convert::{ColumnarWriter, ConvertedMember, TabularConverter};
pub use coordinator::DownloadCoordinator;
pub use error::{ConversionError, DiscoveryError, DownloadError, Error, Result};
pub use harvester::Harvester;
pub use store::{Decision, IdempotencyStore};
pub use types::{
    ConversionRecord, Feed, FeedKey, FeedOutcome, MemberFailure, RunStatistics, SkipReason,
};
