//! Storage tiering decision.
//!
//! A dataset is kept [`StorageTier::Inline`] only when both its row count and its byte size are
//! within the configured thresholds; otherwise its rows go to the row store and only a preview is
//! kept with the metadata. The decision depends on nothing but its arguments, so it can be
//! re-derived from stored metadata.

use crate::config::TieringConfig;
use crate::types::{CanonicalRow, DatasetMetadata, StorageTier};

/// Pick the storage tier for a parsed dataset.
///
/// # Examples
///
/// ```
/// use tabular_ingest::config::TieringConfig;
/// use tabular_ingest::tiering::decide_tier;
/// use tabular_ingest::types::StorageTier;
///
/// let thresholds = TieringConfig::default();
/// assert_eq!(decide_tier(3, 42, &thresholds), StorageTier::Inline);
/// assert_eq!(decide_tier(1_001, 42, &thresholds), StorageTier::RowStore);
/// ```
pub fn decide_tier(row_count: u64, byte_size: u64, thresholds: &TieringConfig) -> StorageTier {
    if row_count <= thresholds.max_rows_for_inline && byte_size <= thresholds.max_bytes_for_inline
    {
        StorageTier::Inline
    } else {
        StorageTier::RowStore
    }
}

/// Re-derive the tier of a recorded dataset from its metadata.
pub fn tier_for(metadata: &DatasetMetadata, thresholds: &TieringConfig) -> StorageTier {
    decide_tier(metadata.row_count, metadata.byte_size, thresholds)
}

/// The first `n` rows.
pub fn preview(rows: &[CanonicalRow], n: usize) -> Vec<CanonicalRow> {
    rows.iter().take(n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalSchema;

    fn thresholds(rows: u64, bytes: u64) -> TieringConfig {
        TieringConfig {
            max_rows_for_inline: rows,
            max_bytes_for_inline: bytes,
            preview_rows: 2,
        }
    }

    #[test]
    fn both_thresholds_must_hold() {
        let t = thresholds(10, 100);
        assert_eq!(decide_tier(10, 100, &t), StorageTier::Inline);
        assert_eq!(decide_tier(11, 100, &t), StorageTier::RowStore);
        assert_eq!(decide_tier(10, 101, &t), StorageTier::RowStore);
        assert_eq!(decide_tier(0, 0, &t), StorageTier::Inline);
    }

    #[test]
    fn decision_is_repeatable() {
        let t = thresholds(1000, 5 * 1024 * 1024);
        let first = decide_tier(999, 4096, &t);
        for _ in 0..10 {
            assert_eq!(decide_tier(999, 4096, &t), first);
        }
    }

    #[test]
    fn preview_is_bounded() {
        let schema = CanonicalSchema::new(vec!["Line".to_string()]);
        let rows: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|v| CanonicalRow::from_values(&schema, [v]))
            .collect();
        assert_eq!(preview(&rows, 2).len(), 2);
        assert_eq!(preview(&rows, 10).len(), 3);
        assert!(preview(&rows, 0).is_empty());
    }
}
