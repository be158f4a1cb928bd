/*!
 * Quasar - parallel CSV bulk-import engine
 *
 * Materializes a single large delimited text file into a time-partitioned
 * columnar table using a pool of worker tasks:
 * - Quote-aware chunk boundary resolution
 * - Per-chunk timestamp indexing into partition buckets
 * - Timestamp-ordered partition import into per-worker shadow tables
 * - Symbol dictionary reconciliation with on-disk key remapping
 * - Value-list index builds for indexed columns
 * - Cooperative cancellation through a shared circuit breaker
 */

pub mod config;
pub mod error;
pub mod import;
pub mod logging;
pub mod stats;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{Atomicity, ImportJob, JobFile, LogLevel, PartitionBy};
pub use error::{ErrorCategory, ImportError, Result};
pub use import::{import_csv, import_csv_with_breaker, CircuitBreaker, Phase};
pub use stats::{JobResult, JobStatus};
pub use types::{ColumnType, Schema, TimestampParser};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
