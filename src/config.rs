//! Configuration types for gtfs-harvest
//!
//! A single [`Config`] value is constructed at process entry and passed by
//! reference to every component that needs it — there is no process-wide
//! mutable state.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Directory API configuration (auth, listing, pagination)
///
/// The listing API is stricter about request rate than the archive hosts,
/// so it gets its own small concurrency pool and tighter timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the feed directory API
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Long-lived refresh token exchanged for a short-lived access token.
    /// When unset, the whole run is skipped before any network call.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Page size for the offset/limit listing cursor (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum concurrent listing requests (default: 5)
    #[serde(default = "default_api_concurrency")]
    pub max_concurrent_requests: usize,

    /// Fixed delay before each page request of the same partition, in
    /// milliseconds (default: 500)
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Total timeout for a single API call (default: 180s)
    #[serde(default = "default_api_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Connect timeout for API calls (default: 30s)
    #[serde(default = "default_api_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            refresh_token: None,
            page_size: default_page_size(),
            max_concurrent_requests: default_api_concurrency(),
            page_delay_ms: default_page_delay_ms(),
            timeout: default_api_timeout(),
            connect_timeout: default_api_connect_timeout(),
        }
    }
}

/// Archive download configuration (concurrency, timeouts, output layout)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root of the output tree; each feed lives under
    /// `{output_dir}/{partition}/{feed_id}/`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Global concurrent download limit (default: 20).
    /// This is the only throttle on the download path.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Total timeout for one archive download (default: 20 minutes).
    /// Some feeds are 100+ MB on slow hosts.
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Connect timeout for archive downloads (default: 60s)
    #[serde(default = "default_download_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Maximum silence on the wire before a download counts as stalled
    /// (default: 5 minutes)
    #[serde(default = "default_read_stall_timeout", with = "duration_serde")]
    pub read_stall_timeout: Duration,

    /// Maximum whole-attempt retries (download + convert) per feed
    /// (default: 3, with 1s/2s/4s backoff)
    #[serde(default = "default_max_feed_retries")]
    pub max_feed_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            timeout: default_download_timeout(),
            connect_timeout: default_download_connect_timeout(),
            read_stall_timeout: default_read_stall_timeout(),
            max_feed_retries: default_max_feed_retries(),
        }
    }
}

/// Columnar conversion configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// File extension of qualifying tabular archive members (default: "txt";
    /// GTFS ships CSV data under `.txt` names)
    #[serde(default = "default_member_extension")]
    pub member_extension: String,

    /// zstd compression level for columnar artifacts (default: 3)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            member_extension: default_member_extension(),
            compression_level: default_compression_level(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false — the directory API's
    /// rate limiter responds better to predictable spacing)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Main configuration for the harvester
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Archive download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Columnar conversion settings
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Retry behavior for directory page requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Partition (country) codes to discover
    #[serde(default = "default_partitions")]
    pub partitions: Vec<String>,

    /// Optional allowlist of `partition:feed_id` keys. Empty means no
    /// filtering — every discovered feed is processed.
    #[serde(default)]
    pub feed_allowlist: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            download: DownloadConfig::default(),
            conversion: ConversionConfig::default(),
            retry: RetryConfig::default(),
            partitions: default_partitions(),
            feed_allowlist: HashSet::new(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.mobilitydatabase.org/v1".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_api_concurrency() -> usize {
    5
}

fn default_page_delay_ms() -> u64 {
    500
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_api_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/feeds")
}

fn default_max_concurrent_downloads() -> usize {
    20
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(1200)
}

fn default_download_connect_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_read_stall_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_feed_retries() -> u32 {
    3
}

fn default_member_extension() -> String {
    "txt".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// EU-27 country codes, the default discovery scope
fn default_partitions() -> Vec<String> {
    [
        "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
        "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// Duration serialization helper (seconds as integers)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
