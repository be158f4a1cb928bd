/*!
 * Parallel CSV import pipeline
 *
 * Six phases, each fanned out over a worker pool: chunk boundary
 * resolution, per-chunk timestamp indexing, per-partition import into
 * worker shadow tables, symbol dictionary reconciliation, in-place key
 * rewrite, and value-list index builds. The coordinator owns phase
 * ordering, result aggregation, and teardown.
 */

pub mod coordinator;
pub mod index;
pub mod indexer;
pub mod importer;
pub mod lexer;
pub mod mapped;
pub mod partition;
pub mod remap;
pub mod scanner;
pub mod shadow;
pub mod source;
pub mod symbols;
pub mod value_index;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use coordinator::{import_csv, import_csv_with_breaker};

/// Rows processed between cooperative cancellation checks in the long
/// inner loops of the indexing and partition-import phases.
pub const CANCEL_CHECK_ROWS: u64 = 4096;

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BoundaryCheck,
    Indexing,
    PartitionImport,
    SymbolTableMerge,
    UpdateSymbolKeys,
    BuildIndex,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::BoundaryCheck => "boundary_check",
            Phase::Indexing => "indexing",
            Phase::PartitionImport => "partition_import",
            Phase::SymbolTableMerge => "symbol_table_merge",
            Phase::UpdateSymbolKeys => "update_symbol_keys",
            Phase::BuildIndex => "build_index",
        }
    }
}

/// Wire-level task status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ok = 0,
    Error = 1,
    Cancel = 2,
}

/// Shared cancellation flag, checked cooperatively by every task at entry
/// and inside long row loops. Tripping is idempotent and thread-safe.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    tripped: Arc<AtomicBool>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_once_and_stays_tripped() {
        let breaker = CircuitBreaker::new();
        assert!(!breaker.is_tripped());
        breaker.trip();
        breaker.trip();
        assert!(breaker.is_tripped());

        let clone = breaker.clone();
        assert!(clone.is_tripped());
    }

    #[test]
    fn phase_names_are_stable() {
        assert_eq!(Phase::BoundaryCheck.name(), "boundary_check");
        assert_eq!(Phase::BuildIndex.name(), "build_index");
    }

    #[test]
    fn status_codes() {
        assert_eq!(TaskStatus::Ok as u8, 0);
        assert_eq!(TaskStatus::Error as u8, 1);
        assert_eq!(TaskStatus::Cancel as u8, 2);
    }
}
