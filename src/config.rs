/*!
 * Import job configuration and defaults
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ImportError, Result};
use crate::types::{ColumnType, Schema};

/// How parse errors are handled during import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomicity {
    /// Offending field becomes NULL; the row is still appended
    SkipColumn,
    /// Offending row is dropped; import continues
    SkipRow,
    /// Any parse error fails the whole job
    SkipAll,
}

impl Default for Atomicity {
    fn default() -> Self {
        Self::SkipColumn
    }
}

impl Atomicity {
    /// Parse from a CLI/config string (e.g. "skip_row")
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skip_column" => Ok(Self::SkipColumn),
            "skip_row" => Ok(Self::SkipRow),
            "skip_all" => Ok(Self::SkipAll),
            _ => Err(ImportError::Config(format!("unknown atomicity mode: {}", s))),
        }
    }
}

/// Time bucket used to partition rows by their designated timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionBy {
    None,
    Hour,
    Day,
    Month,
    Year,
}

impl Default for PartitionBy {
    fn default() -> Self {
        Self::Day
    }
}

impl PartitionBy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(ImportError::Config(format!(
                "unknown partition scheme: {}",
                s
            ))),
        }
    }
}

/// Log verbosity, mapped onto tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// A single bulk-import invocation.
///
/// Owned by the pipeline for the duration of the job.
#[derive(Debug, Clone)]
pub struct ImportJob {
    /// Source CSV file
    pub source: PathBuf,
    /// Directory under which the final table (and its shadow tables and
    /// import scratch space) are materialized
    pub dest_root: PathBuf,
    /// Final table name
    pub table_name: String,
    /// Ordered target columns
    pub schema: Schema,
    /// Index of the designated timestamp column within the schema
    pub timestamp_index: usize,
    /// Time bucketing scheme
    pub partition_by: PartitionBy,
    /// Single-byte column delimiter
    pub delimiter: u8,
    /// Discard the first logical record of the file
    pub ignore_header: bool,
    /// Parse error policy
    pub atomicity: Atomicity,
    /// Worker threads; 0 selects the available parallelism
    pub worker_count: usize,
    /// Per-task read buffer size in bytes
    pub buffer_len: usize,
    /// Default value-block capacity for indexed columns (power of two)
    pub index_value_block_capacity: u32,
    /// Leave scratch files and shadow tables behind on failure (debugging)
    pub keep_artifacts: bool,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
}

impl ImportJob {
    pub fn new(
        source: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
        table_name: impl Into<String>,
        schema: Schema,
        timestamp_index: usize,
    ) -> Self {
        Self {
            source: source.into(),
            dest_root: dest_root.into(),
            table_name: table_name.into(),
            schema,
            timestamp_index,
            partition_by: PartitionBy::default(),
            delimiter: b',',
            ignore_header: false,
            atomicity: Atomicity::default(),
            worker_count: 0,
            buffer_len: 1 << 20,
            index_value_block_capacity: 256,
            keep_artifacts: false,
            log_level: LogLevel::default(),
            log_file: None,
        }
    }

    /// Scratch directory holding per-chunk and merged index files
    pub fn import_root(&self) -> PathBuf {
        self.dest_root.join(format!(".import-{}", self.table_name))
    }

    /// Final table directory
    pub fn table_dir(&self) -> PathBuf {
        self.dest_root.join(&self.table_name)
    }

    /// Shadow table directory for one worker
    pub fn shadow_dir(&self, worker: usize) -> PathBuf {
        self.dest_root
            .join(format!("{}_{}", self.table_name, worker))
    }

    /// Validate the job before any phase runs
    pub fn validate(&self) -> Result<()> {
        if self.schema.is_empty() {
            return Err(ImportError::Config("schema has no columns".to_string()));
        }
        if self.table_name.is_empty() {
            return Err(ImportError::Config("table name is empty".to_string()));
        }
        if self.buffer_len == 0 {
            return Err(ImportError::Config("buffer_len must be > 0".to_string()));
        }
        if self.delimiter == b'"' || self.delimiter == b'\n' {
            return Err(ImportError::Config(
                "delimiter may not be a quote or newline".to_string(),
            ));
        }
        if !self.index_value_block_capacity.is_power_of_two() {
            return Err(ImportError::Config(format!(
                "index_value_block_capacity must be a power of two, got {}",
                self.index_value_block_capacity
            )));
        }
        for col in &self.schema.columns {
            if let Some(cap) = col.index_capacity {
                if !cap.is_power_of_two() {
                    return Err(ImportError::Config(format!(
                        "index capacity for column '{}' must be a power of two, got {}",
                        col.name, cap
                    )));
                }
            }
        }
        let ts_col = self.schema.columns.get(self.timestamp_index).ok_or_else(|| {
            ImportError::Config(format!(
                "timestamp column index {} out of range ({} columns)",
                self.timestamp_index,
                self.schema.len()
            ))
        })?;
        if ts_col.col_type != ColumnType::Timestamp {
            return Err(ImportError::Config(format!(
                "designated timestamp column '{}' has type {}",
                ts_col.name,
                ts_col.col_type.name()
            )));
        }
        Ok(())
    }

    /// Resolve `worker_count = 0` to the detected parallelism
    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            detect_parallelism()
        }
    }
}

/// Detected CPU parallelism, falling back to single-threaded mode when the
/// host refuses to answer (restricted containers, exotic cgroups).
pub fn detect_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|e| {
            tracing::warn!(
                "failed to detect available parallelism: {}; defaulting to 1 worker",
                e
            );
            1
        })
}

/// Optional TOML file overriding job settings; CLI flags win over the file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub worker_count: Option<usize>,
    pub buffer_len: Option<usize>,
    pub atomicity: Option<Atomicity>,
    pub partition_by: Option<PartitionBy>,
    pub ignore_header: Option<bool>,
    pub delimiter: Option<String>,
    pub index_value_block_capacity: Option<u32>,
    pub keep_artifacts: Option<bool>,
    pub log_level: Option<LogLevel>,
    pub log_file: Option<PathBuf>,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| ImportError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Fold file settings into a job; job fields already set by the CLI are
    /// passed in as `None` here by the caller, so the file only fills gaps.
    pub fn apply(&self, job: &mut ImportJob) -> Result<()> {
        if let Some(w) = self.worker_count {
            job.worker_count = w;
        }
        if let Some(b) = self.buffer_len {
            job.buffer_len = b;
        }
        if let Some(a) = self.atomicity {
            job.atomicity = a;
        }
        if let Some(p) = self.partition_by {
            job.partition_by = p;
        }
        if let Some(h) = self.ignore_header {
            job.ignore_header = h;
        }
        if let Some(ref d) = self.delimiter {
            job.delimiter = parse_delimiter(d)?;
        }
        if let Some(c) = self.index_value_block_capacity {
            job.index_value_block_capacity = c;
        }
        if let Some(k) = self.keep_artifacts {
            job.keep_artifacts = k;
        }
        if let Some(l) = self.log_level {
            job.log_level = l;
        }
        if let Some(ref f) = self.log_file {
            job.log_file = Some(f.clone());
        }
        Ok(())
    }
}

/// Parse a delimiter argument; accepts a single character or `\t`.
pub fn parse_delimiter(s: &str) -> Result<u8> {
    let bytes: &[u8] = match s {
        "\\t" | "tab" => b"\t",
        other => other.as_bytes(),
    };
    if bytes.len() != 1 {
        return Err(ImportError::Config(format!(
            "delimiter must be a single byte, got '{}'",
            s
        )));
    }
    Ok(bytes[0])
}
