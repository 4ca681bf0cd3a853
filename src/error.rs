//! Error types for gtfs-harvest
//!
//! The error taxonomy mirrors the scopes at which failures are handled:
//! - [`Error::Auth`] is fatal to the whole run and never retried
//! - [`DiscoveryError`] is scoped to a single partition page
//! - [`DownloadError`] is scoped to a single feed attempt
//! - [`ConversionError`] distinguishes member-scoped failures (recorded,
//!   non-fatal) from archive-scoped failures (the whole feed fails)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gtfs-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gtfs-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication against the directory API failed.
    ///
    /// Every subsequent call depends on the access token, so this is fatal
    /// to the run and surfaced immediately without retry.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output_dir")
        key: Option<String>,
    },

    /// Feed directory discovery error
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Archive download error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Archive extraction or columnar conversion error
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Feed directory discovery errors (per partition page)
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A single page request failed after exhausting its retries
    #[error("partition {partition}: page at offset {offset} failed: {reason}")]
    PageFailed {
        /// Partition code being listed
        partition: String,
        /// Pagination offset of the failing page
        offset: u32,
        /// Why the page request failed
        reason: String,
    },

    /// The listing endpoint returned a non-success status
    #[error("partition {partition}: directory API returned HTTP {status}")]
    BadStatus {
        /// Partition code being listed
        partition: String,
        /// HTTP status code returned by the API
        status: u16,
    },
}

/// Archive download errors (per feed attempt)
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The archive endpoint returned a non-success status
    #[error("archive request returned HTTP {status}")]
    BadStatus {
        /// HTTP status code returned by the archive host
        status: u16,
    },

    /// The response body is an HTML page, not an archive.
    ///
    /// Several hosts serve soft-404 or maintenance pages with a 200 status;
    /// the content type is the only reliable signal.
    #[error("archive endpoint returned HTML instead of an archive")]
    HtmlResponse,

    /// No bytes arrived for longer than the read-stall timeout
    #[error("download stalled: no data for {stalled_secs}s")]
    Stalled {
        /// Seconds of silence before the watchdog fired
        stalled_secs: u64,
    },

    /// The whole download exceeded its total time budget
    #[error("download exceeded total timeout of {limit_secs}s")]
    TimedOut {
        /// The configured total timeout in seconds
        limit_secs: u64,
    },
}

/// Conversion errors (archive-scoped and member-scoped)
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The downloaded archive cannot be opened as a ZIP
    #[error("corrupt archive {archive}: {reason}")]
    CorruptArchive {
        /// Path of the archive that failed to open
        archive: PathBuf,
        /// Underlying ZIP error text
        reason: String,
    },

    /// The archive contains no qualifying tabular members.
    ///
    /// There is nothing to produce, so the whole feed fails and all
    /// intermediate state is discarded.
    #[error("archive {archive} contains no tabular members")]
    NoTabularMembers {
        /// Path of the empty archive
        archive: PathBuf,
    },

    /// A single member failed to convert (recorded, does not abort the feed)
    #[error("member {member} failed to convert: {reason}")]
    MemberFailed {
        /// Archive member name
        member: String,
        /// Underlying converter error text
        reason: String,
    },

    /// Writing the conversion record failed, so produced artifacts were
    /// discarded (an unrecorded success is indistinguishable from never
    /// having run)
    #[error("conversion record could not be persisted for {key}")]
    RecordNotPersisted {
        /// Feed key whose record write failed
        key: String,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = Error::Discovery(DiscoveryError::PageFailed {
            partition: "FR".to_string(),
            offset: 300,
            reason: "timeout".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("FR"));
        assert!(text.contains("300"));
        assert!(text.contains("timeout"));
    }

    #[test]
    fn download_error_converts_to_error() {
        let err: Error = DownloadError::HtmlResponse.into();
        assert!(matches!(err, Error::Download(DownloadError::HtmlResponse)));
    }

    #[test]
    fn conversion_error_carries_archive_path() {
        let err = ConversionError::NoTabularMembers {
            archive: PathBuf::from("/tmp/feed.zip"),
        };
        assert!(err.to_string().contains("feed.zip"));
    }

    #[test]
    fn io_error_converts_to_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
