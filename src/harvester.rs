//! Run driver: authenticate → discover → process → aggregate
//!
//! Owns the two HTTP clients (strict timeouts for directory traffic, long
//! timeouts for bulk transfer) and wires the components together. A run
//! always completes with aggregate statistics unless authentication itself
//! fails — per-feed and per-partition failures degrade, never abort.

use crate::auth;
use crate::config::Config;
use crate::coordinator::DownloadCoordinator;
use crate::directory::FeedDirectory;
use crate::error::Result;
use crate::pipeline::ConversionPipeline;
use crate::report;
use crate::store::IdempotencyStore;
use crate::types::{Feed, FeedOutcome, RunStatistics};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use tracing::{info, warn};

/// Top-level feed-ingestion engine
pub struct Harvester {
    config: Arc<Config>,
    api_client: reqwest::Client,
    directory: FeedDirectory,
    coordinator: Arc<DownloadCoordinator>,
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Harvester {
    /// Build a harvester from configuration.
    ///
    /// Fails when the API base URL is not a valid URL or an HTTP client
    /// cannot be constructed.
    pub fn new(config: Config) -> Result<Self> {
        url::Url::parse(&config.api.base_url).map_err(|e| crate::error::Error::Config {
            message: format!("invalid API base URL {:?}: {e}", config.api.base_url),
            key: Some("api.base_url".to_string()),
        })?;

        let config = Arc::new(config);

        let api_client = reqwest::Client::builder()
            .connect_timeout(config.api.connect_timeout)
            .timeout(config.api.timeout)
            .build()?;

        // No whole-client timeout here: the per-download total timeout is
        // enforced by the coordinator
        let download_client = reqwest::Client::builder()
            .connect_timeout(config.download.connect_timeout)
            .build()?;

        let store = IdempotencyStore::new(&config);
        let converter = Arc::new(crate::convert::ColumnarWriter::new(
            config.conversion.compression_level,
        ));
        let pipeline = ConversionPipeline::new(config.clone(), store.clone(), converter);
        let coordinator = Arc::new(DownloadCoordinator::new(
            download_client,
            config.clone(),
            store,
            pipeline,
        ));
        let directory = FeedDirectory::new(api_client.clone(), config.clone());

        Ok(Self {
            config,
            api_client,
            directory,
            coordinator,
        })
    }

    /// Execute one full run and return its aggregate statistics.
    ///
    /// Authentication failure is the only fatal error. When no refresh
    /// token is configured the run is skipped entirely (empty statistics)
    /// before any network call.
    pub async fn run(&self) -> Result<RunStatistics> {
        let has_token = self
            .config
            .api
            .refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty());
        if !has_token {
            warn!("no directory API refresh token configured, run skipped");
            return Ok(RunStatistics::default());
        }

        let token = auth::authenticate(&self.api_client, &self.config).await?;

        let mut feeds = self.directory.discover(&token).await;
        feeds = self.apply_allowlist(feeds);

        info!(feeds = feeds.len(), "processing discovered feeds");
        let outcomes = self.process_all(feeds).await;

        let stats = report::aggregate(&outcomes);
        info!(
            total = stats.total,
            success = stats.success,
            partial = stats.partial,
            failed = stats.failed,
            skipped = stats.skipped,
            downloaded_bytes = stats.downloaded_bytes,
            converted_bytes = stats.converted_bytes,
            "run finished"
        );
        Ok(stats)
    }

    /// Drop feeds outside the configured allowlist (no-op when empty)
    fn apply_allowlist(&self, feeds: Vec<Feed>) -> Vec<Feed> {
        if self.config.feed_allowlist.is_empty() {
            return feeds;
        }
        let before = feeds.len();
        let feeds: Vec<Feed> = feeds
            .into_iter()
            .filter(|feed| self.config.feed_allowlist.contains(&feed.key().to_string()))
            .collect();
        info!(
            kept = feeds.len(),
            dropped = before - feeds.len(),
            "allowlist applied"
        );
        feeds
    }

    /// Fan every feed out through the coordinator and collect terminal
    /// outcomes in completion order
    async fn process_all(&self, feeds: Vec<Feed>) -> Vec<FeedOutcome> {
        let total = feeds.len();
        let mut tasks: FuturesUnordered<_> = feeds
            .iter()
            .map(|feed| self.coordinator.process(feed))
            .collect();

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = tasks.next().await {
            outcomes.push(outcome);
            let done = outcomes.len();
            if done % 100 == 0 || done == total {
                info!(done = done, total = total, "feed progress");
            }
        }
        outcomes
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_token_short_circuits_to_empty_statistics() {
        let mut config = Config::default();
        config.api.refresh_token = None;
        let harvester = Harvester::new(config).unwrap();

        let stats = harvester.run().await.unwrap();
        assert_eq!(stats, RunStatistics::default());
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        let err = Harvester::new(config).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config { .. }));
        assert!(err.to_string().contains("base URL"));
    }

    #[tokio::test]
    async fn empty_token_counts_as_missing() {
        let mut config = Config::default();
        config.api.refresh_token = Some(String::new());
        let harvester = Harvester::new(config).unwrap();

        let stats = harvester.run().await.unwrap();
        assert_eq!(stats.total, 0);
    }
}
