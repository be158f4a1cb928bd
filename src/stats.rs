/*!
 * Job outcome reporting
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Terminal outcome of an import job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Failed { reason: String },
    Cancelled,
}

impl JobStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, JobStatus::Ok)
    }
}

/// What an import run produced.
///
/// `rows_per_partition` is keyed by partition label and sorted, so repeated
/// runs of the same job report identically regardless of worker scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(flatten)]
    pub status: JobStatus,
    pub rows_per_partition: BTreeMap<String, i64>,
    /// Recoverable per-row parse errors counted under skip_row/skip_column
    pub errors: i64,
    pub duration: Duration,
}

impl JobResult {
    pub fn failed(reason: String, errors: i64, duration: Duration) -> Self {
        Self {
            status: JobStatus::Failed { reason },
            rows_per_partition: BTreeMap::new(),
            errors,
            duration,
        }
    }

    pub fn cancelled(duration: Duration) -> Self {
        Self {
            status: JobStatus::Cancelled,
            rows_per_partition: BTreeMap::new(),
            errors: 0,
            duration,
        }
    }

    pub fn total_rows(&self) -> i64 {
        self.rows_per_partition.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_rows_sums_partitions() {
        let mut result = JobResult {
            status: JobStatus::Ok,
            rows_per_partition: BTreeMap::new(),
            errors: 0,
            duration: Duration::ZERO,
        };
        result.rows_per_partition.insert("1970-01-01".to_string(), 3);
        result.rows_per_partition.insert("1970-01-02".to_string(), 2);
        assert_eq!(result.total_rows(), 5);
        assert!(result.status.is_ok());
    }

    #[test]
    fn failed_result_carries_reason() {
        let r = JobResult::failed("boom".to_string(), 1, Duration::from_millis(5));
        assert_eq!(
            r.status,
            JobStatus::Failed {
                reason: "boom".to_string()
            }
        );
        assert!(!r.status.is_ok());
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert!(json.contains("cancelled"));
    }
}
