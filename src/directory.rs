//! Paginated multi-partition feed discovery
//!
//! Walks the directory API's offset/limit cursor for every configured
//! partition. Listing traffic is isolated from bulk downloads by its own
//! small semaphore, with a fixed delay before each page to stay under the
//! API's rate limit. A partition that keeps failing contributes an empty
//! result and a warning — it never aborts discovery for its siblings.

use crate::auth::AccessToken;
use crate::config::Config;
use crate::error::{DiscoveryError, Error, Result};
use crate::retry::retry_with_backoff;
use crate::types::Feed;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Wire shape of one directory entry. Every field is optional — the API
/// omits fields freely and a missing field must degrade, not fail.
#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    locations: Option<Vec<LocationEntry>>,
    #[serde(default)]
    latest_dataset: Option<DatasetEntry>,
}

#[derive(Debug, Deserialize)]
struct LocationEntry {
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetEntry {
    #[serde(default)]
    hosted_url: Option<String>,
}

impl FeedEntry {
    /// Map a wire entry into a domain [`Feed`], or `None` when the entry
    /// has no id (nothing to key on)
    fn into_feed(self, queried_partition: &str) -> Option<Feed> {
        let id = self.id?;
        let partition = self
            .locations
            .as_ref()
            .and_then(|l| l.first())
            .and_then(|l| l.country_code.as_deref())
            .unwrap_or(queried_partition)
            .to_uppercase();
        Some(Feed {
            id,
            provider: self.provider.unwrap_or_else(|| "unknown".to_string()),
            partition,
            download_url: self.latest_dataset.and_then(|d| d.hosted_url),
        })
    }
}

/// Discovers feeds across partitions through the paginated listing endpoint
pub struct FeedDirectory {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl FeedDirectory {
    /// Create a directory backed by the given API client
    pub fn new(client: reqwest::Client, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// Discover all active feeds for the configured partitions.
    ///
    /// Partitions fan out concurrently under the API semaphore; results are
    /// flattened with no ordering guarantee.
    pub async fn discover(&self, token: &AccessToken) -> Vec<Feed> {
        let partitions = &self.config.partitions;
        info!(partitions = partitions.len(), "discovering feeds");

        let semaphore = Arc::new(Semaphore::new(self.config.api.max_concurrent_requests));

        let tasks = partitions.iter().map(|partition| {
            let semaphore = semaphore.clone();
            async move {
                self.discover_partition(token, partition, semaphore).await
            }
        });

        let per_partition = futures::future::join_all(tasks).await;

        let feeds: Vec<Feed> = per_partition.into_iter().flatten().collect();
        info!(feeds = feeds.len(), "discovery finished");
        feeds
    }

    /// Page through one partition's listing until a short or empty page.
    ///
    /// A page request that exhausts its retries degrades the whole
    /// partition to an empty result.
    async fn discover_partition(
        &self,
        token: &AccessToken,
        partition: &str,
        semaphore: Arc<Semaphore>,
    ) -> Vec<Feed> {
        let page_size = self.config.api.page_size;
        let mut feeds: Vec<Feed> = Vec::new();
        let mut offset: u32 = 0;

        loop {
            let page = {
                // Listing permits are held across the pre-request delay so
                // the delay actually spaces out API traffic
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return feeds,
                };
                tokio::time::sleep(Duration::from_millis(self.config.api.page_delay_ms)).await;

                retry_with_backoff(&self.config.retry, || {
                    self.fetch_page(token, partition, offset)
                })
                .await
            };

            match page {
                Ok(entries) => {
                    let received = entries.len() as u32;
                    feeds.extend(
                        entries
                            .into_iter()
                            .filter_map(|entry| entry.into_feed(partition)),
                    );

                    // A short page is the end of the partition's data
                    if received < page_size {
                        break;
                    }
                    offset += page_size;
                }
                Err(e) => {
                    warn!(
                        partition = partition,
                        offset = offset,
                        error = %e,
                        "partition page failed after retries; partition degraded to empty"
                    );
                    return Vec::new();
                }
            }
        }

        if !feeds.is_empty() {
            debug!(partition = partition, feeds = feeds.len(), "partition listed");
        }
        feeds
    }

    /// One listing request: `GET /gtfs_feeds?country_code=..&status=active&limit=..&offset=..`
    async fn fetch_page(
        &self,
        token: &AccessToken,
        partition: &str,
        offset: u32,
    ) -> Result<Vec<FeedEntry>> {
        let url = format!("{}/gtfs_feeds", self.config.api.base_url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .query(&[
                ("country_code", partition),
                ("status", "active"),
                ("limit", &self.config.api.page_size.to_string()),
                ("offset", &offset.to_string()),
            ])
            .timeout(self.config.api.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Discovery(DiscoveryError::BadStatus {
                partition: partition.to_string(),
                status: status.as_u16(),
            }));
        }

        let entries: Vec<FeedEntry> = response.json().await?;
        Ok(entries)
    }
}
