//! Tabular-to-columnar conversion capability
//!
//! The pipeline consumes conversion through the [`TabularConverter`] trait
//! so the engine never depends on a specific columnar backend. The shipped
//! [`ColumnarWriter`] parses delimited text tolerantly — malformed rows are
//! diverted to a side channel instead of aborting the member — and writes a
//! zstd-compressed column-major artifact next to the feed's record.

use crate::error::{ConversionError, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension of columnar artifacts produced by [`ColumnarWriter`]
pub const ARTIFACT_EXTENSION: &str = "colz";

/// Result of converting one tabular member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedMember {
    /// Number of valid rows written to the artifact
    pub rows_written: u64,
    /// Number of malformed rows diverted to the side channel
    pub rows_diverted: u64,
    /// Path of the produced artifact. `None` when zero valid rows were
    /// found (nothing is written for an effectively-empty member).
    pub artifact: Option<PathBuf>,
}

/// Converts one delimited text file into a columnar artifact.
///
/// Implementations must be tolerant: individual malformed rows are diverted,
/// not fatal. Only unrecoverable structural problems (unreadable file,
/// unparseable header) may fail the call.
#[async_trait]
pub trait TabularConverter: Send + Sync {
    /// Convert `input` into a columnar artifact inside `output_dir`
    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<ConvertedMember>;
}

/// On-disk shape of a columnar artifact (before zstd compression)
#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnarArtifact {
    /// Artifact schema version
    pub schema_version: u32,
    /// Column names, from the source header row
    pub columns: Vec<String>,
    /// Number of valid rows
    pub rows: u64,
    /// Cell data, one vector per column (column-major)
    pub data: Vec<Vec<String>>,
    /// Raw text of malformed rows, preserved for later inspection
    #[serde(default)]
    pub diverted: Vec<String>,
}

/// Default converter: tolerant CSV parsing into zstd-compressed
/// column-major JSON
#[derive(Debug, Clone)]
pub struct ColumnarWriter {
    compression_level: i32,
}

impl ColumnarWriter {
    /// Create a writer with the given zstd compression level
    pub fn new(compression_level: i32) -> Self {
        Self { compression_level }
    }

    fn convert_blocking(
        input: &Path,
        output_dir: &Path,
        compression_level: i32,
    ) -> Result<ConvertedMember> {
        let member_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(input)
            .map_err(|e| {
                Error::Conversion(ConversionError::MemberFailed {
                    member: member_name.clone(),
                    reason: format!("unreadable file: {e}"),
                })
            })?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| {
                Error::Conversion(ConversionError::MemberFailed {
                    member: member_name.clone(),
                    reason: format!("unparseable header: {e}"),
                })
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() {
            return Err(Error::Conversion(ConversionError::MemberFailed {
                member: member_name,
                reason: "header row is empty".to_string(),
            }));
        }

        let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        let mut rows_written: u64 = 0;
        let mut diverted: Vec<String> = Vec::new();

        for result in reader.records() {
            match result {
                Ok(record) => {
                    if record.len() == headers.len() {
                        for (column, field) in columns.iter_mut().zip(record.iter()) {
                            column.push(field.to_string());
                        }
                        rows_written += 1;
                    } else {
                        // Field-count mismatch: divert rather than abort
                        diverted.push(record.iter().collect::<Vec<_>>().join(","));
                    }
                }
                Err(e) => {
                    // Row-scoped parse error (bad UTF-8, unterminated
                    // quote); divert its description and keep going
                    diverted.push(format!("<unparseable row: {e}>"));
                }
            }
        }

        let rows_diverted = diverted.len() as u64;

        if rows_written == 0 {
            debug!(member = %member_name, "no valid rows after tolerant parsing");
            return Ok(ConvertedMember {
                rows_written: 0,
                rows_diverted,
                artifact: None,
            });
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "member".to_string());
        let artifact_path = output_dir.join(format!("{stem}.{ARTIFACT_EXTENSION}"));

        let artifact = ColumnarArtifact {
            schema_version: 1,
            columns: headers,
            rows: rows_written,
            data: columns,
            diverted,
        };

        let file = std::fs::File::create(&artifact_path)?;
        let mut encoder = zstd::stream::write::Encoder::new(file, compression_level)
            .map_err(Error::Io)?;
        serde_json::to_writer(&mut encoder, &artifact)?;
        encoder.finish().map_err(Error::Io)?;

        debug!(
            member = %member_name,
            rows = rows_written,
            diverted = rows_diverted,
            artifact = %artifact_path.display(),
            "member converted"
        );

        Ok(ConvertedMember {
            rows_written,
            rows_diverted,
            artifact: Some(artifact_path),
        })
    }
}

#[async_trait]
impl TabularConverter for ColumnarWriter {
    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<ConvertedMember> {
        let input = input.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let level = self.compression_level;

        // CSV parsing and zstd encoding are CPU-bound; keep them off the
        // async workers
        tokio::task::spawn_blocking(move || {
            Self::convert_blocking(&input, &output_dir, level)
        })
        .await
        .map_err(|e| Error::Other(format!("conversion task panicked: {e}")))?
    }
}

/// Read back a columnar artifact (decompress + deserialize)
pub fn read_artifact(path: &Path) -> Result<ColumnarArtifact> {
    let file = std::fs::File::open(path)?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(Error::Io)?;
    let artifact = serde_json::from_reader(decoder)?;
    Ok(artifact)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn convert_str(content: &str) -> (TempDir, Result<ConvertedMember>) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("stops.txt");
        std::fs::write(&input, content).unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let result = ColumnarWriter::new(3).convert(&input, &out).await;
        (dir, result)
    }

    #[tokio::test]
    async fn converts_well_formed_csv() {
        let (_dir, result) =
            convert_str("stop_id,stop_name\n1,Central\n2,Harbour\n").await;
        let member = result.unwrap();
        assert_eq!(member.rows_written, 2);
        assert_eq!(member.rows_diverted, 0);

        let artifact = read_artifact(&member.artifact.unwrap()).unwrap();
        assert_eq!(artifact.columns, vec!["stop_id", "stop_name"]);
        assert_eq!(artifact.rows, 2);
        assert_eq!(artifact.data[0], vec!["1", "2"]);
        assert_eq!(artifact.data[1], vec!["Central", "Harbour"]);
    }

    #[tokio::test]
    async fn malformed_rows_are_diverted_not_fatal() {
        let (_dir, result) =
            convert_str("a,b\n1,2\nonly-one-field\n3,4\n").await;
        let member = result.unwrap();
        assert_eq!(member.rows_written, 2, "valid rows survive");
        assert_eq!(member.rows_diverted, 1, "short row diverted");

        let artifact = read_artifact(&member.artifact.unwrap()).unwrap();
        assert_eq!(artifact.diverted.len(), 1);
    }

    #[tokio::test]
    async fn zero_valid_rows_produces_no_artifact() {
        let (_dir, result) = convert_str("a,b\n").await;
        let member = result.unwrap();
        assert_eq!(member.rows_written, 0);
        assert!(member.artifact.is_none());
    }

    #[tokio::test]
    async fn unreadable_input_is_a_member_failure() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.txt");
        let result = ColumnarWriter::new(3).convert(&missing, dir.path()).await;
        assert!(matches!(
            result,
            Err(Error::Conversion(ConversionError::MemberFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn quoted_multiline_fields_survive() {
        let (_dir, result) =
            convert_str("id,desc\n1,\"line one\nline two\"\n").await;
        let member = result.unwrap();
        assert_eq!(member.rows_written, 1);
        let artifact = read_artifact(&member.artifact.unwrap()).unwrap();
        assert!(artifact.data[1][0].contains("line two"));
    }
}
