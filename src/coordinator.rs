//! Admission-controlled, deduplicated feed downloads
//!
//! One [`DownloadCoordinator::process`] call takes a feed from discovered to
//! a terminal outcome. A single global semaphore bounds concurrent
//! downloads; an in-flight set guarantees at most one download/convert per
//! feed key within the process; the idempotency store decides skip / reset /
//! fresh before the network is touched. Conversion runs inline on the same
//! task as the download so the in-flight entry spans both phases.

use crate::config::Config;
use crate::error::{DownloadError, Error, Result};
use crate::pipeline::ConversionPipeline;
use crate::store::{Decision, IdempotencyStore, remove_file_if_exists};
use crate::types::{Feed, FeedKey, FeedOutcome, SkipReason};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Coordinates the download / convert / persist flow for every feed
pub struct DownloadCoordinator {
    client: reqwest::Client,
    config: Arc<Config>,
    store: IdempotencyStore,
    pipeline: ConversionPipeline,
    download_permits: Arc<Semaphore>,
    /// Keys currently being processed. The lock is held only for the brief
    /// insert/remove, never across a download.
    in_flight: Mutex<HashSet<FeedKey>>,
}

impl DownloadCoordinator {
    /// Create a coordinator sharing the given download client and pipeline
    pub fn new(
        client: reqwest::Client,
        config: Arc<Config>,
        store: IdempotencyStore,
        pipeline: ConversionPipeline,
    ) -> Self {
        let permits = config.download.max_concurrent_downloads;
        Self {
            client,
            config,
            store,
            pipeline,
            download_permits: Arc::new(Semaphore::new(permits)),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Process one discovered feed to a terminal outcome.
    ///
    /// Never returns an error: every failure mode folds into
    /// [`FeedOutcome::Failed`] so one feed can never abort its siblings.
    pub async fn process(&self, feed: &Feed) -> FeedOutcome {
        let key = feed.key();

        let Some(url) = feed.download_url.clone() else {
            debug!(feed = %key, "no download URL, skipping");
            return FeedOutcome::Skipped {
                key,
                reason: SkipReason::NoDownloadUrl,
            };
        };

        // Claim the in-flight slot; a duplicate schedule returns
        // immediately without queuing
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key.clone()) {
                debug!(feed = %key, "already being processed by another task, skipping");
                return FeedOutcome::Skipped {
                    key,
                    reason: SkipReason::AlreadyInProgress,
                };
            }
        }

        let outcome = self.process_claimed(feed, &key, &url).await;

        // The slot is released on every exit path
        self.in_flight.lock().await.remove(&key);
        outcome
    }

    async fn process_claimed(&self, feed: &Feed, key: &FeedKey, url: &str) -> FeedOutcome {
        match self.store.lookup(key) {
            Decision::Skip => {
                debug!(feed = %key, "already converted, skipping");
                return FeedOutcome::Skipped {
                    key: key.clone(),
                    reason: SkipReason::AlreadyConverted,
                };
            }
            Decision::Reset => {
                debug!(feed = %key, "previous attempt incomplete, resetting");
                self.store.discard(key);
            }
            Decision::Fresh => {}
        }

        let temp_zip = self.temp_archive_path(key);
        let max_retries = self.config.download.max_feed_retries;
        let mut delay = self.config.retry.initial_delay;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    delay.as_secs_f64() * self.config.retry.backoff_multiplier,
                )
                .min(self.config.retry.max_delay);
            }

            // Each attempt starts clean: partial archive and partial
            // artifacts from the previous attempt are removed first
            remove_file_if_exists(&temp_zip);
            if attempt > 0 {
                self.store.discard(key);
            }

            match self.attempt(feed, key, url, &temp_zip).await {
                Ok(outcome) => return outcome,
                Err(e) if attempt < max_retries => {
                    warn!(
                        feed = %key,
                        attempt = attempt + 1,
                        max_attempts = max_retries + 1,
                        error = %e,
                        "feed attempt failed, retrying"
                    );
                }
                Err(e) => {
                    warn!(feed = %key, error = %e, "feed failed after all attempts");
                    remove_file_if_exists(&temp_zip);
                    self.store.discard(key);
                    return FeedOutcome::Failed {
                        key: key.clone(),
                        reason: e.to_string(),
                    };
                }
            }
        }

        // The loop always returns; this satisfies the compiler
        FeedOutcome::Failed {
            key: key.clone(),
            reason: "retry loop exited unexpectedly".to_string(),
        }
    }

    /// One whole attempt: download + convert under a single download permit
    async fn attempt(
        &self,
        feed: &Feed,
        key: &FeedKey,
        url: &str,
        temp_zip: &std::path::Path,
    ) -> Result<FeedOutcome> {
        let _permit = self
            .download_permits
            .acquire()
            .await
            .map_err(|_| Error::Other("download semaphore closed".to_string()))?;

        self.download_archive(key, url, temp_zip).await?;

        // Conversion happens before the permit (and the in-flight entry)
        // is released
        let record = self.pipeline.convert(temp_zip, feed).await?;

        // Success and Partial both require at least one converted member.
        // The zero-converted record stays on disk; the store reads it as
        // incomplete and resets the feed on the next run.
        let outcome = if record.members_converted == 0 {
            warn!(feed = %key, "no member produced an artifact, feed failed");
            FeedOutcome::Failed {
                key: key.clone(),
                reason: "no members converted".to_string(),
            }
        } else if record.failed_members.is_empty() {
            FeedOutcome::Success {
                key: key.clone(),
                downloaded_bytes: record.original_size_bytes,
                converted_bytes: record.converted_size_bytes,
                members_converted: record.members_converted,
            }
        } else {
            FeedOutcome::Partial {
                key: key.clone(),
                downloaded_bytes: record.original_size_bytes,
                converted_bytes: record.converted_size_bytes,
                members_converted: record.members_converted,
                members_failed: record.failed_members.len() as u32,
            }
        };
        Ok(outcome)
    }

    /// Stream the archive to `dest` in bounded chunks.
    ///
    /// The whole transfer runs under the total download timeout; each chunk
    /// read additionally runs under the read-stall watchdog.
    async fn download_archive(
        &self,
        key: &FeedKey,
        url: &str,
        dest: &std::path::Path,
    ) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total_timeout = self.config.download.timeout;
        let transfer = self.stream_to_file(key, url, dest);

        match tokio::time::timeout(total_timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(Error::Download(DownloadError::TimedOut {
                limit_secs: total_timeout.as_secs(),
            })),
        }
    }

    async fn stream_to_file(
        &self,
        key: &FeedKey,
        url: &str,
        dest: &std::path::Path,
    ) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(DownloadError::BadStatus {
                status: status.as_u16(),
            }));
        }

        // Archive hosts serve soft error pages with a 200; the content
        // type is the only reliable signal
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if content_type.contains("text/html") {
            return Err(Error::Download(DownloadError::HtmlResponse));
        }

        let stall_timeout = self.config.download.read_stall_timeout;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes_written: u64 = 0;
        let mut response = response;

        loop {
            let chunk = match tokio::time::timeout(stall_timeout, response.chunk()).await {
                Ok(next) => next?,
                Err(_) => {
                    return Err(Error::Download(DownloadError::Stalled {
                        stalled_secs: stall_timeout.as_secs(),
                    }));
                }
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }

        file.flush().await?;
        debug!(feed = %key, bytes = bytes_written, "archive downloaded");
        Ok(bytes_written)
    }

    /// Temp path for a feed's in-progress archive, next to (not inside)
    /// the feed's output directory so a Reset never deletes a live download
    fn temp_archive_path(&self, key: &FeedKey) -> PathBuf {
        self.config
            .download
            .output_dir
            .join(&key.partition)
            .join(format!("{}_temp.zip", key.feed_id))
    }
}
