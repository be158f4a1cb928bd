/*!
 * Per-chunk timestamp indexing
 *
 * Parses every row of a resolved parse region, extracts the designated
 * timestamp, derives the partition label, and appends an index entry to
 * the region's per-partition index file. Rows whose timestamp does not
 * parse cannot be placed in any partition; depending on atomicity they
 * either fail the task or are logged and counted.
 */

use std::path::Path;

use crate::config::{Atomicity, ImportJob};
use crate::error::{ImportError, Result};
use crate::import::index::{ChunkIndexWriter, IndexEntry};
use crate::import::lexer::{RecordAssembler, ScanControl};
use crate::import::partition::partition_key;
use crate::import::scanner::ParseRegion;
use crate::import::source::SourceFile;
use crate::import::{CircuitBreaker, CANCEL_CHECK_ROWS};
use crate::types::TimestampParser;

/// What one indexing task hands back to the coordinator.
#[derive(Debug, Clone)]
pub struct ChunkIndexReport {
    pub chunk_index: usize,
    /// Logical records seen (header excluded)
    pub rows: u64,
    /// Rows dropped for an unparseable timestamp
    pub errors: u64,
    /// Longest raw record in bytes, terminator included
    pub max_line_len: u64,
    /// Partition labels this chunk wrote index files for
    pub partitions: Vec<String>,
}

/// Index one parse region into per-partition index files under
/// `<import_root>/<chunk_index>/`.
pub fn index_region(
    job: &ImportJob,
    import_root: &Path,
    region: &ParseRegion,
    breaker: &CircuitBreaker,
) -> Result<ChunkIndexReport> {
    let source = SourceFile::open(&job.source)?;
    let mut writer = ChunkIndexWriter::new(import_root, region.chunk_index)?;
    let ts_parser = TimestampParser::new();

    let mut assembler = RecordAssembler::new(job.delimiter, region.lo, region.starting_line);
    let mut buf = vec![0u8; job.buffer_len];

    let mut rows = 0u64;
    let mut errors = 0u64;
    let mut max_line_len = 0u64;
    // Only the region that starts the file can hold the header
    let mut skip_header = job.ignore_header && region.lo == 0;
    let ts_column = job.timestamp_index;
    let atomicity = job.atomicity;
    let partition_by = job.partition_by;

    let mut on_record = |record: &crate::import::lexer::RawRecord<'_>| -> Result<ScanControl> {
        if skip_header {
            skip_header = false;
            return Ok(ScanControl::Continue);
        }
        rows += 1;
        if rows % CANCEL_CHECK_ROWS == 0 && breaker.is_tripped() {
            return Err(ImportError::Cancelled);
        }
        max_line_len = max_line_len.max(record.raw_len);

        let parsed = record
            .field(ts_column)
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| "empty timestamp field".to_string())
            .and_then(|bytes| ts_parser.parse_micros(bytes).map_err(|e| e.to_string()));

        let micros = match parsed {
            Ok(micros) => micros,
            Err(detail) => {
                if atomicity == Atomicity::SkipAll {
                    return Err(ImportError::BadTimestamp {
                        line: record.line,
                        offset: record.start_offset,
                        detail,
                    });
                }
                errors += 1;
                tracing::warn!(
                    column = ts_column,
                    offset = record.start_offset,
                    line = record.line,
                    column_type = "timestamp",
                    raw = %String::from_utf8_lossy(record.field(ts_column).unwrap_or(b"")),
                    "row skipped: {}",
                    detail
                );
                return Ok(ScanControl::Continue);
            }
        };

        writer.append(
            &partition_key(partition_by, micros),
            IndexEntry {
                timestamp: micros,
                offset: record.start_offset as i64,
            },
        )?;
        Ok(ScanControl::Continue)
    };

    let mut offset = region.lo;
    while offset < region.hi {
        if breaker.is_tripped() {
            return Err(ImportError::Cancelled);
        }
        let want = ((region.hi - offset) as usize).min(buf.len());
        source.read_exact_at(&mut buf[..want], offset)?;
        assembler.process(&buf[..want], &mut on_record)?;
        offset += want as u64;
    }
    // A region ending at the file's last byte may carry an unterminated row
    if region.hi == source.len() {
        assembler.finish(&mut on_record)?;
    }
    drop(on_record);

    let partitions = writer.finish()?;
    Ok(ChunkIndexReport {
        chunk_index: region.chunk_index,
        rows,
        errors,
        max_line_len,
        partitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::scanner::{plan_chunks, scan_chunk, stitch_regions};
    use crate::types::Schema;
    use tempfile::tempdir;

    fn job(source: &Path, dest: &Path) -> ImportJob {
        let schema = Schema::parse("id:symbol,v:double,ts:timestamp").unwrap();
        let mut job = ImportJob::new(source, dest, "trips", schema, 2);
        job.buffer_len = 64;
        job
    }

    fn regions_for(path: &Path, workers: usize, buffer: usize) -> Vec<ParseRegion> {
        let size = std::fs::metadata(path).unwrap().len();
        let chunks = plan_chunks(size, workers);
        let breaker = CircuitBreaker::new();
        let censuses: Vec<_> = chunks
            .iter()
            .map(|c| scan_chunk(path, c, buffer, &breaker).unwrap())
            .collect();
        stitch_regions(&chunks, &censuses, size).unwrap()
    }

    #[test]
    fn indexes_rows_into_day_partitions() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(
            &src,
            "ALPHA,10,1970-01-01T00:00:00.000000Z\n\
             OMEGA,11,1970-01-02T00:00:00.000000Z\n\
             ALPHA,12,1970-01-01T00:01:00.000000Z\n",
        )
        .unwrap();
        let root = dir.path().join("scratch");

        let job = job(&src, dir.path());
        let regions = regions_for(&src, 1, 64);
        let report =
            index_region(&job, &root, &regions[0], &CircuitBreaker::new()).unwrap();

        assert_eq!(report.rows, 3);
        assert_eq!(report.errors, 0);
        assert_eq!(
            report.partitions,
            vec!["1970-01-01".to_string(), "1970-01-02".to_string()]
        );
        let p0 = std::fs::metadata(root.join("0/1970-01-01")).unwrap().len();
        assert_eq!(p0, 32);
        assert!(report.max_line_len >= 37);
    }

    #[test]
    fn header_skipped_only_in_first_region() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(
            &src,
            "sensor_id,temperature,ts\n\
             ALPHA,10,1970-01-01T00:00:00.000000Z\n",
        )
        .unwrap();
        let root = dir.path().join("scratch");

        let mut job = job(&src, dir.path());
        job.ignore_header = true;
        let regions = regions_for(&src, 1, 64);
        let report =
            index_region(&job, &root, &regions[0], &CircuitBreaker::new()).unwrap();
        assert_eq!(report.rows, 1);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn bad_timestamp_counts_under_skip_row() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(
            &src,
            "A,1,1970-01-01T00:00:00.000000Z\n\
             B,2,not-a-date\n\
             C,3,1970-01-01T00:02:00.000000Z\n",
        )
        .unwrap();
        let root = dir.path().join("scratch");

        let mut job = job(&src, dir.path());
        job.atomicity = Atomicity::SkipRow;
        let regions = regions_for(&src, 1, 64);
        let report =
            index_region(&job, &root, &regions[0], &CircuitBreaker::new()).unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.errors, 1);
        // only two entries indexed
        let len = std::fs::metadata(root.join("0/1970-01-01")).unwrap().len();
        assert_eq!(len, 32);
    }

    #[test]
    fn bad_timestamp_fails_task_under_skip_all() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(&src, "B,2,not-a-date\n").unwrap();
        let root = dir.path().join("scratch");

        let mut job = job(&src, dir.path());
        job.atomicity = Atomicity::SkipAll;
        let regions = regions_for(&src, 1, 64);
        let err =
            index_region(&job, &root, &regions[0], &CircuitBreaker::new()).unwrap_err();
        assert!(matches!(err, ImportError::BadTimestamp { line: 1, .. }));
    }

    #[test]
    fn multi_region_indexing_covers_all_rows() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.csv");
        let mut data = String::new();
        for i in 0..50 {
            data.push_str(&format!(
                "S{},{},1970-01-01T00:00:{:02}.000000Z\n",
                i % 4,
                i,
                i % 60
            ));
        }
        std::fs::write(&src, &data).unwrap();
        let root = dir.path().join("scratch");

        let job = job(&src, dir.path());
        let regions = regions_for(&src, 4, 64);
        assert!(regions.len() > 1);

        let mut total = 0;
        for region in &regions {
            let report =
                index_region(&job, &root, region, &CircuitBreaker::new()).unwrap();
            total += report.rows;
        }
        assert_eq!(total, 50);
    }
}
