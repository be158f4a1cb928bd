/*!
 * Error types for the import engine
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug)]
pub enum ImportError {
    /// Source file not found or not a regular file
    SourceNotFound(PathBuf),

    /// Generic I/O error
    Io(io::Error),

    /// Read fell short of the requested range
    ReadFailed {
        path: PathBuf,
        offset: u64,
        source: io::Error,
    },

    /// Write or sync to an output file failed
    WriteFailed { path: PathBuf, source: io::Error },

    /// Memory-mapping a file failed
    MmapFailed { path: PathBuf, source: io::Error },

    /// Designated timestamp field did not parse
    BadTimestamp { line: u64, offset: u64, detail: String },

    /// A field failed to parse for its declared column type
    BadField {
        line: u64,
        column: usize,
        detail: String,
    },

    /// File ended inside a quoted field
    UnterminatedQuote { offset: u64 },

    /// Configuration or schema error
    Config(String),

    /// Internal invariant broken; indicates a bug, aborts the job
    ContractViolation(String),

    /// A worker symbol dictionary overflowed the key space
    TooManySymbols { column: String },

    /// Worker pool plumbing error
    Parallel(String),

    /// The circuit breaker was tripped
    Cancelled,
}

impl ImportError {
    /// Whether this error terminates the job regardless of atomicity mode.
    ///
    /// Parse errors are recoverable: `SkipRow` and `SkipColumn` downgrade
    /// them to counted per-row errors.
    pub fn is_fatal(&self) -> bool {
        match self {
            ImportError::BadTimestamp { .. } => false,
            ImportError::BadField { .. } => false,

            ImportError::SourceNotFound(_) => true,
            ImportError::Io(_) => true,
            ImportError::ReadFailed { .. } => true,
            ImportError::WriteFailed { .. } => true,
            ImportError::MmapFailed { .. } => true,
            ImportError::UnterminatedQuote { .. } => true,
            ImportError::Config(_) => true,
            ImportError::ContractViolation(_) => true,
            ImportError::TooManySymbols { .. } => true,
            ImportError::Parallel(_) => true,
            ImportError::Cancelled => true,
        }
    }

    /// Error category for logging and aggregation
    pub fn category(&self) -> ErrorCategory {
        match self {
            ImportError::SourceNotFound(_)
            | ImportError::Io(_)
            | ImportError::ReadFailed { .. }
            | ImportError::WriteFailed { .. }
            | ImportError::MmapFailed { .. } => ErrorCategory::Io,
            ImportError::BadTimestamp { .. }
            | ImportError::BadField { .. }
            | ImportError::UnterminatedQuote { .. } => ErrorCategory::Parse,
            ImportError::Config(_) => ErrorCategory::Config,
            ImportError::ContractViolation(_) | ImportError::TooManySymbols { .. } => {
                ErrorCategory::Contract
            }
            ImportError::Parallel(_) => ErrorCategory::Concurrency,
            ImportError::Cancelled => ErrorCategory::Cancel,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// I/O operation errors (open/read/write/mmap)
    Io,
    /// CSV or field parse errors
    Parse,
    /// Configuration and schema errors
    Config,
    /// Broken internal invariants
    Contract,
    /// Worker pool errors
    Concurrency,
    /// Cooperative cancellation
    Cancel,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Contract => write!(f, "contract"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::Cancel => write!(f, "cancel"),
        }
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::SourceNotFound(path) => {
                write!(f, "Source not found: {}", path.display())
            }
            ImportError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            ImportError::ReadFailed {
                path,
                offset,
                source,
            } => {
                write!(
                    f,
                    "Read failed at offset {} of {}: {}",
                    offset,
                    path.display(),
                    source
                )
            }
            ImportError::WriteFailed { path, source } => {
                write!(f, "Write failed for {}: {}", path.display(), source)
            }
            ImportError::MmapFailed { path, source } => {
                write!(f, "mmap failed for {}: {}", path.display(), source)
            }
            ImportError::BadTimestamp {
                line,
                offset,
                detail,
            } => {
                write!(
                    f,
                    "Bad timestamp at line {} (offset {}): {}",
                    line, offset, detail
                )
            }
            ImportError::BadField {
                line,
                column,
                detail,
            } => {
                write!(
                    f,
                    "Bad field at line {}, column {}: {}",
                    line, column, detail
                )
            }
            ImportError::UnterminatedQuote { offset } => {
                write!(f, "File ends inside a quoted field (offset {})", offset)
            }
            ImportError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            ImportError::ContractViolation(msg) => {
                write!(f, "Contract violation: {}", msg)
            }
            ImportError::TooManySymbols { column } => {
                write!(
                    f,
                    "Symbol column '{}' exceeds the per-worker key space",
                    column
                )
            }
            ImportError::Parallel(msg) => {
                write!(f, "Parallel processing error: {}", msg)
            }
            ImportError::Cancelled => {
                write!(f, "Task is cancelled")
            }
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::ReadFailed { source, .. } => Some(source),
            ImportError::WriteFailed { source, .. } => Some(source),
            ImportError::MmapFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ImportError {
    fn from(err: io::Error) -> Self {
        ImportError::Io(err)
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::ContractViolation(format!("table metadata: {}", err))
    }
}
