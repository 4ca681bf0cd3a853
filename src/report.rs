//! Run statistics aggregation
//!
//! A pure fold over terminal feed outcomes. Runs only after every feed has
//! reached a terminal state, so the report is complete and independent of
//! completion order.

use crate::pipeline::compression_ratio;
use crate::types::{FeedOutcome, RunStatistics};

/// Fold all terminal outcomes into run-level statistics.
///
/// Success and Partial feeds contribute to byte totals and the
/// per-partition breakdown; Partial is counted separately from pure
/// Success in the outcome tallies.
pub fn aggregate<'a, I>(outcomes: I) -> RunStatistics
where
    I: IntoIterator<Item = &'a FeedOutcome>,
{
    let mut stats = RunStatistics::default();

    for outcome in outcomes {
        stats.total += 1;
        match outcome {
            FeedOutcome::Success {
                key,
                downloaded_bytes,
                converted_bytes,
                ..
            } => {
                stats.success += 1;
                stats.downloaded_bytes += downloaded_bytes;
                stats.converted_bytes += converted_bytes;
                let partition = stats.by_partition.entry(key.partition.clone()).or_default();
                partition.feeds += 1;
                partition.converted_bytes += converted_bytes;
            }
            FeedOutcome::Partial {
                key,
                downloaded_bytes,
                converted_bytes,
                ..
            } => {
                stats.partial += 1;
                stats.downloaded_bytes += downloaded_bytes;
                stats.converted_bytes += converted_bytes;
                let partition = stats.by_partition.entry(key.partition.clone()).or_default();
                partition.feeds += 1;
                partition.converted_bytes += converted_bytes;
            }
            FeedOutcome::Failed { .. } => stats.failed += 1,
            FeedOutcome::Skipped { .. } => stats.skipped += 1,
        }
    }

    stats.space_saved_bytes = stats.downloaded_bytes as i64 - stats.converted_bytes as i64;
    stats.compression_ratio_pct =
        compression_ratio(stats.downloaded_bytes, stats.converted_bytes);
    stats
}
