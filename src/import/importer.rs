/*!
 * Partition import
 *
 * Merges a partition's chunk index files into a timestamp-ordered stream,
 * reads each row back from the source at its indexed offset, parses the
 * fields, and appends the rows to the owning worker's shadow table. Rows
 * are staged in full before any byte hits a column file, so a failed row
 * never persists partially.
 */

use std::path::{Path, PathBuf};

use crate::config::{Atomicity, ImportJob};
use crate::error::{ImportError, Result};
use crate::import::index::merge_partition_index;
use crate::import::lexer::{RawRecord, RecordAssembler, ScanControl};
use crate::import::shadow::{PartitionAppender, ShadowTable, StagedValue};
use crate::import::source::SourceFile;
use crate::import::{CircuitBreaker, CANCEL_CHECK_ROWS};
use crate::types::{ColumnType, TimestampParser};

/// What one partition-import task hands back to the coordinator.
#[derive(Debug, Clone)]
pub struct PartitionImportReport {
    pub partition: String,
    /// Rows appended to the shadow table
    pub rows: i64,
    /// Rows or fields skipped under the recoverable atomicity modes
    pub errors: u64,
}

/// Import one destination partition into `shadow`.
///
/// On any fatal error the partially-written partition directory is removed
/// from the shadow table before the error propagates.
pub fn import_partition(
    job: &ImportJob,
    import_root: &Path,
    partition: &str,
    chunk_files: &[(usize, PathBuf)],
    max_line_len: u64,
    shadow: &mut ShadowTable,
    breaker: &CircuitBreaker,
) -> Result<PartitionImportReport> {
    let result = import_partition_inner(
        job,
        import_root,
        partition,
        chunk_files,
        max_line_len,
        shadow,
        breaker,
    );
    if result.is_err() {
        shadow.rollback_partition(partition);
    }
    result
}

fn import_partition_inner(
    job: &ImportJob,
    import_root: &Path,
    partition: &str,
    chunk_files: &[(usize, PathBuf)],
    max_line_len: u64,
    shadow: &mut ShadowTable,
    breaker: &CircuitBreaker,
) -> Result<PartitionImportReport> {
    let merged = merge_partition_index(import_root, partition, chunk_files)?;
    if merged.is_empty() {
        return Ok(PartitionImportReport {
            partition: partition.to_string(),
            rows: 0,
            errors: 0,
        });
    }

    let source = SourceFile::open(&job.source)?;
    let mut appender = PartitionAppender::create(shadow.partition_dir(partition), &job.schema)?;

    // Twice the longest row guarantees one whole record per read
    let read_len = (2 * max_line_len as usize).max(job.buffer_len);
    let mut row_buf = vec![0u8; read_len];
    let mut staged: Vec<StagedValue> = Vec::with_capacity(job.schema.len());
    let mut scratch: Vec<u8> = Vec::with_capacity(256);
    let ts_parser = TimestampParser::new();

    let mut errors = 0u64;
    let mut seen = 0u64;

    for entry in merged.iter() {
        seen += 1;
        if seen % CANCEL_CHECK_ROWS == 0 && breaker.is_tripped() {
            return Err(ImportError::Cancelled);
        }

        let offset = entry.offset as u64;
        let n = source.read_at(&mut row_buf, offset)?;
        if n == 0 {
            return Err(ImportError::ContractViolation(format!(
                "indexed offset {} is past the end of {}",
                offset,
                job.source.display()
            )));
        }

        let mut assembler = RecordAssembler::new(job.delimiter, offset, 0);
        staged.clear();
        scratch.clear();
        let mut row_error: Option<ImportError> = None;

        {
            let mut on_record = |record: &RawRecord<'_>| -> Result<ScanControl> {
                match stage_row(
                    job,
                    record,
                    entry.timestamp,
                    shadow,
                    &ts_parser,
                    &mut staged,
                    &mut scratch,
                ) {
                    Ok(nulled) => errors += nulled,
                    Err(e) if e.is_fatal() || job.atomicity == Atomicity::SkipAll => {
                        return Err(e)
                    }
                    Err(e) => row_error = Some(e),
                }
                Ok(ScanControl::Stop)
            };
            let control = assembler.process(&row_buf[..n], &mut on_record)?;
            if control == ScanControl::Continue {
                assembler.finish(&mut on_record)?;
            }
        }

        match row_error {
            None => {
                if staged.len() != job.schema.len() {
                    return Err(ImportError::ContractViolation(format!(
                        "row at offset {} staged {} of {} columns",
                        offset,
                        staged.len(),
                        job.schema.len()
                    )));
                }
                appender.append_row(&job.schema, &staged, &scratch)?;
            }
            Some(e) => {
                // stage_row resolves SkipColumn fields to NULL, so reaching
                // here means the whole row is dropped
                debug_assert_eq!(job.atomicity, Atomicity::SkipRow);
                errors += 1;
                tracing::warn!(offset, partition, "row skipped: {}", e);
            }
        }
    }

    let rows = appender.commit()? as i64;
    shadow.record_partition(partition, rows);
    shadow.store()?;

    Ok(PartitionImportReport {
        partition: partition.to_string(),
        rows,
        errors,
    })
}

/// Parse a record's fields into staged values. The designated timestamp
/// column takes the already-parsed index value and is not re-parsed.
///
/// Under `SkipColumn`, a bad field becomes NULL and staging continues; the
/// returned count feeds the job's error total. Under `SkipRow` and
/// `SkipAll` the first bad field aborts the row.
fn stage_row(
    job: &ImportJob,
    record: &RawRecord<'_>,
    timestamp: i64,
    shadow: &mut ShadowTable,
    ts_parser: &TimestampParser,
    staged: &mut Vec<StagedValue>,
    scratch: &mut Vec<u8>,
) -> Result<u64> {
    let mut nulled = 0u64;
    for (i, col) in job.schema.columns.iter().enumerate() {
        if i == job.timestamp_index {
            staged.push(StagedValue::Timestamp(timestamp));
            continue;
        }
        let bytes = record.field(i).unwrap_or(b"");
        if bytes.is_empty() {
            staged.push(StagedValue::Null);
            continue;
        }
        match parse_field(col.col_type, i, bytes, shadow, ts_parser, scratch) {
            Ok(value) => staged.push(value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => match job.atomicity {
                Atomicity::SkipAll | Atomicity::SkipRow => return Err(e),
                Atomicity::SkipColumn => {
                    nulled += 1;
                    tracing::warn!(
                        column = i,
                        offset = record.start_offset,
                        column_type = col.col_type.name(),
                        raw = %String::from_utf8_lossy(bytes),
                        "field nulled: {}",
                        e
                    );
                    staged.push(StagedValue::Null);
                }
            },
        }
    }
    Ok(nulled)
}

fn parse_field(
    col_type: ColumnType,
    column: usize,
    bytes: &[u8],
    shadow: &mut ShadowTable,
    ts_parser: &TimestampParser,
    scratch: &mut Vec<u8>,
) -> Result<StagedValue> {
    let bad = |detail: String| ImportError::BadField {
        line: 0,
        column,
        detail,
    };

    match col_type {
        ColumnType::Boolean => {
            if bytes.eq_ignore_ascii_case(b"true") {
                Ok(StagedValue::Bool(true))
            } else if bytes.eq_ignore_ascii_case(b"false") {
                Ok(StagedValue::Bool(false))
            } else {
                Err(bad(format!(
                    "'{}' is not a boolean",
                    String::from_utf8_lossy(bytes)
                )))
            }
        }
        ColumnType::Int => utf8(bytes, column)?
            .trim()
            .parse::<i32>()
            .map(StagedValue::Int)
            .map_err(|e| bad(e.to_string())),
        ColumnType::Long => utf8(bytes, column)?
            .trim()
            .parse::<i64>()
            .map(StagedValue::Long)
            .map_err(|e| bad(e.to_string())),
        ColumnType::Double => utf8(bytes, column)?
            .trim()
            .parse::<f64>()
            .map(StagedValue::Double)
            .map_err(|e| bad(e.to_string())),
        ColumnType::Timestamp => ts_parser
            .parse_micros(bytes)
            .map(StagedValue::Timestamp)
            .map_err(|e| bad(e.to_string())),
        ColumnType::Symbol => {
            let text = utf8(bytes, column)?;
            let key = shadow.intern(column, text)?;
            Ok(StagedValue::Symbol(key))
        }
        ColumnType::String => {
            utf8(bytes, column)?;
            let start = scratch.len();
            scratch.extend_from_slice(bytes);
            Ok(StagedValue::Str {
                start,
                end: scratch.len(),
            })
        }
    }
}

fn utf8(bytes: &[u8], column: usize) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| ImportError::BadField {
        line: 0,
        column,
        detail: "invalid UTF-8".to_string(),
    })
}
