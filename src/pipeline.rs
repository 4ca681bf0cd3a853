//! Extract / convert / persist pipeline
//!
//! Turns one downloaded archive into a directory of columnar artifacts plus
//! a conversion record. Member-scoped failures are recorded and do not
//! abort the feed; archive-scoped failures (corrupt ZIP, zero tabular
//! members) fail the whole feed and trigger full cleanup. Extraction
//! temporaries are removed before the record is persisted so a persistence
//! failure never leaves extraction garbage behind.

use crate::config::Config;
use crate::convert::TabularConverter;
use crate::error::{ConversionError, Error, Result};
use crate::store::{IdempotencyStore, remove_file_if_exists};
use crate::types::{ConversionRecord, Feed, MemberFailure, RECORD_SCHEMA_VERSION};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the per-feed extraction scratch directory
const EXTRACT_TMP: &str = "_extract_tmp";

/// Converts downloaded archives into columnar artifacts
pub struct ConversionPipeline {
    config: Arc<Config>,
    store: IdempotencyStore,
    converter: Arc<dyn TabularConverter>,
}

impl ConversionPipeline {
    /// Create a pipeline writing under the store's output layout
    pub fn new(
        config: Arc<Config>,
        store: IdempotencyStore,
        converter: Arc<dyn TabularConverter>,
    ) -> Self {
        Self {
            config,
            store,
            converter,
        }
    }

    /// Convert one archive. On success the conversion record has been
    /// persisted and the archive file removed; `record.failed_members`
    /// distinguishes a full success from a partial one.
    ///
    /// An `Err` means the feed produced nothing durable: all intermediate
    /// state (extraction scratch, feed directory, archive) has been cleaned
    /// up and the feed counts as failed.
    pub async fn convert(&self, archive_path: &Path, feed: &Feed) -> Result<ConversionRecord> {
        let key = feed.key();
        let feed_dir = self.store.feed_dir(&key);
        let extract_dir = feed_dir.join(EXTRACT_TMP);
        std::fs::create_dir_all(&extract_dir)?;

        if let Err(e) = extract_archive(archive_path, &extract_dir).await {
            self.cleanup_failed(&extract_dir, &feed_dir, archive_path);
            return Err(e);
        }

        let members =
            collect_tabular_members(&extract_dir, &self.config.conversion.member_extension)?;
        if members.is_empty() {
            warn!(feed = %key, "no tabular members in archive, feed failed");
            self.cleanup_failed(&extract_dir, &feed_dir, archive_path);
            return Err(Error::Conversion(ConversionError::NoTabularMembers {
                archive: archive_path.to_path_buf(),
            }));
        }

        let mut members_converted: u32 = 0;
        let mut failed_members: Vec<MemberFailure> = Vec::new();
        let mut artifacts: Vec<String> = Vec::new();

        for member in &members {
            let member_name = member
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| member.display().to_string());

            // Empty members carry nothing worth converting
            match std::fs::metadata(member) {
                Ok(meta) if meta.len() == 0 => {
                    debug!(feed = %key, member = %member_name, "empty member, skipped");
                    continue;
                }
                Err(e) => {
                    debug!(feed = %key, member = %member_name, error = %e, "member vanished, skipped");
                    continue;
                }
                Ok(_) => {}
            }

            match self.converter.convert(member, &feed_dir).await {
                Ok(converted) => match converted.artifact {
                    Some(artifact) => {
                        members_converted += 1;
                        if let Some(name) = artifact.file_name() {
                            artifacts.push(name.to_string_lossy().into_owned());
                        }
                    }
                    None => {
                        debug!(
                            feed = %key,
                            member = %member_name,
                            "no valid rows after tolerant parsing, member skipped"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        feed = %key,
                        member = %member_name,
                        error = %e,
                        "member failed to convert, continuing with remaining members"
                    );
                    failed_members.push(MemberFailure {
                        member: member_name,
                        error: e.to_string(),
                    });
                }
            }
        }

        let original_size = std::fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0);
        let converted_size: u64 = artifacts
            .iter()
            .filter_map(|name| std::fs::metadata(feed_dir.join(name)).ok())
            .map(|m| m.len())
            .sum();
        let compression_ratio_pct = compression_ratio(original_size, converted_size);

        // Scratch goes before the record so a persistence failure never
        // leaves extraction garbage behind
        remove_dir_if_exists(&extract_dir);

        let record = ConversionRecord {
            schema_version: RECORD_SCHEMA_VERSION,
            feed_id: feed.id.clone(),
            provider: feed.provider.clone(),
            partition: feed.partition.clone(),
            members_converted,
            failed_members,
            original_size_bytes: original_size,
            converted_size_bytes: converted_size,
            compression_ratio_pct,
            artifacts,
            converted_at: Utc::now(),
        };

        if !self.store.persist(&key, &record) {
            // An unrecorded success is indistinguishable from never having
            // run; the artifacts cannot be left on disk
            warn!(feed = %key, "record not persisted, discarding produced artifacts");
            self.store.discard(&key);
            remove_file_if_exists(archive_path);
            return Err(Error::Conversion(ConversionError::RecordNotPersisted {
                key: key.to_string(),
            }));
        }

        // The columnar form supersedes the archive
        remove_file_if_exists(archive_path);

        debug!(
            feed = %key,
            converted = record.members_converted,
            failed = record.failed_members.len(),
            ratio_pct = format!("{compression_ratio_pct:.1}"),
            "conversion finished"
        );

        Ok(record)
    }

    fn cleanup_failed(&self, extract_dir: &Path, feed_dir: &Path, archive_path: &Path) {
        remove_dir_if_exists(extract_dir);
        remove_dir_if_exists(feed_dir);
        remove_file_if_exists(archive_path);
    }
}

/// `(original - converted) / original` as a percentage, 0 for an empty original
pub(crate) fn compression_ratio(original: u64, converted: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        (original as f64 - converted as f64) / original as f64 * 100.0
    }
}

/// Extract a ZIP archive into `dest`, failing with a [`ConversionError`]
/// on anything that is not a readable ZIP
async fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let archive_path = archive_path.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            Error::Conversion(ConversionError::CorruptArchive {
                archive: archive_path.clone(),
                reason: e.to_string(),
            })
        })?;
        archive.extract(&dest).map_err(|e| {
            Error::Conversion(ConversionError::CorruptArchive {
                archive: archive_path.clone(),
                reason: e.to_string(),
            })
        })?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Other(format!("extraction task panicked: {e}")))?
}

/// Recursively collect member files with the expected tabular extension,
/// excluding dotfiles and macOS resource-fork directories
fn collect_tabular_members(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut members = Vec::new();
    collect_into(dir, extension, &mut members)?;
    members.sort();
    Ok(members)
}

fn collect_into(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            if name == "__MACOSX" {
                continue;
            }
            collect_into(&path, extension, out)?;
        } else if path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}

fn remove_dir_if_exists(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "failed to remove directory");
        }
    }
}
