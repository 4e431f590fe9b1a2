//! The frozen mapping from comparison counts to similarity thresholds.
//!
//! The table is derived from the cumulative distribution of similarity
//! scores between unrelated spectra. It ships as data, not code, and is
//! parsed once at startup.

use thiserror::Error;

/// The embedded threshold table, a TSV of `(comparisons, threshold)` rows.
pub const CUMULATIVE_CDF_TABLE: &str = include_str!("../data/cumulative.cdf.tsv");

#[derive(Debug, Error)]
pub enum ThresholdTableError {
    #[error("line {0}: expected two tab-separated columns")]
    MalformedRow(usize),
    #[error("line {0}: {1}")]
    UnparseableNumber(usize, String),
    #[error("the table must be sorted by comparison count ascending")]
    UnsortedComparisons,
    #[error("thresholds must be monotonically non-increasing")]
    IncreasingThreshold,
    #[error("the table is empty")]
    Empty,
}

/// A monotonically non-increasing step function from the number of
/// comparisons performed to the similarity required to call a match.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    rows: Vec<(u64, f64)>,
}

impl ThresholdTable {
    pub fn from_tsv(text: &str) -> Result<Self, ThresholdTableError> {
        let mut rows: Vec<(u64, f64)> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (n, t) = match (fields.next(), fields.next()) {
                (Some(n), Some(t)) => (n, t),
                _ => return Err(ThresholdTableError::MalformedRow(lineno + 1)),
            };
            let n: u64 = n
                .parse()
                .map_err(|e| ThresholdTableError::UnparseableNumber(lineno + 1, format!("{e}")))?;
            let t: f64 = t
                .parse()
                .map_err(|e| ThresholdTableError::UnparseableNumber(lineno + 1, format!("{e}")))?;
            if let Some(&(last_n, last_t)) = rows.last() {
                if n <= last_n {
                    return Err(ThresholdTableError::UnsortedComparisons);
                }
                if t > last_t {
                    return Err(ThresholdTableError::IncreasingThreshold);
                }
            }
            rows.push((n, t));
        }
        if rows.is_empty() {
            return Err(ThresholdTableError::Empty);
        }
        Ok(Self { rows })
    }

    /// The table distributed with the library.
    pub fn embedded() -> Self {
        Self::from_tsv(CUMULATIVE_CDF_TABLE).expect("the embedded threshold table is well-formed")
    }

    /// The threshold parameterized for `n_comparisons`: the row with the
    /// greatest comparison count not exceeding `n_comparisons`, an exact
    /// row taking precedence. Counts below the first row use the first
    /// row's threshold.
    pub fn threshold_for(&self, n_comparisons: u64) -> f64 {
        let idx = self.rows.partition_point(|&(n, _)| n <= n_comparisons);
        if idx == 0 {
            self.rows[0].1
        } else {
            self.rows[idx - 1].1
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Supplies the clustering threshold, flooring the comparison count at a
/// configured minimum so that young clusters are not held to the looser
/// thresholds of the table's head.
#[derive(Debug, Clone)]
pub struct MinNumberComparisonsAssessor {
    min_comparisons: u64,
    table: ThresholdTable,
}

impl MinNumberComparisonsAssessor {
    pub fn new(min_comparisons: u64) -> Self {
        Self::with_table(min_comparisons, ThresholdTable::embedded())
    }

    pub fn with_table(min_comparisons: u64, table: ThresholdTable) -> Self {
        Self {
            min_comparisons,
            table,
        }
    }

    pub fn min_comparisons(&self) -> u64 {
        self.min_comparisons
    }

    pub fn threshold(&self, n_comparisons: u64) -> f64 {
        self.table
            .threshold_for(n_comparisons.max(self.min_comparisons))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_embedded_table_parses() {
        let table = ThresholdTable::embedded();
        assert!(!table.is_empty());
    }

    #[test]
    fn test_step_lookup() {
        let table = ThresholdTable::from_tsv("10\t0.9\n100\t0.8\n1000\t0.7\n").unwrap();
        assert_eq!(table.threshold_for(3), 0.9);
        assert_eq!(table.threshold_for(10), 0.9);
        assert_eq!(table.threshold_for(99), 0.9);
        assert_eq!(table.threshold_for(100), 0.8);
        assert_eq!(table.threshold_for(500), 0.8);
        assert_eq!(table.threshold_for(10_000), 0.7);
    }

    #[test]
    fn test_rejects_increasing_thresholds() {
        assert!(matches!(
            ThresholdTable::from_tsv("10\t0.8\n100\t0.9\n"),
            Err(ThresholdTableError::IncreasingThreshold)
        ));
    }

    #[test]
    fn test_rejects_unsorted_rows() {
        assert!(matches!(
            ThresholdTable::from_tsv("100\t0.9\n10\t0.8\n"),
            Err(ThresholdTableError::UnsortedComparisons)
        ));
    }

    #[test]
    fn test_assessor_floors_comparison_count() {
        let table = ThresholdTable::from_tsv("10\t0.9\n100\t0.8\n1000\t0.7\n").unwrap();
        let assessor = MinNumberComparisonsAssessor::with_table(100, table);
        assert_eq!(assessor.threshold(1), 0.8);
        assert_eq!(assessor.threshold(100), 0.8);
        assert_eq!(assessor.threshold(5000), 0.7);
    }
}
