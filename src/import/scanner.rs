/*!
 * Chunk boundary resolution
 *
 * The source file is split into tentative equal-length chunks. Each chunk
 * is scanned once, counting quote bytes and recording the first newline of
 * each quote parity. Stitching the per-chunk censuses together yields, for
 * every chunk, the first file offset at which a row begins outside any
 * quoted field, so the indexing pass can parse chunks independently.
 */

use std::path::Path;

use crate::error::{ImportError, Result};
use crate::import::source::SourceFile;
use crate::import::CircuitBreaker;

/// Half-open byte range `[lo, hi)` handed to one scan task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteChunk {
    pub index: usize,
    pub lo: u64,
    pub hi: u64,
}

/// Per-chunk scan result.
///
/// Newlines are bucketed by the parity of the running quote count at the
/// point they were seen: even parity means the scanner was outside any
/// quoted field (relative to the chunk start).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteCensus {
    pub quote_count: u64,
    pub newline_count: [u64; 2],
    /// Absolute file offset of the first newline seen at each parity
    pub first_newline: [Option<u64>; 2],
}

/// A resolved byte range that the indexing pass parses as complete rows.
///
/// `chunk_index` is the chunk that owns the region's left boundary; index
/// output for the region goes under that chunk's scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRegion {
    pub chunk_index: usize,
    pub lo: u64,
    pub hi: u64,
    /// Absolute 1-based logical line number of the region's first row
    pub starting_line: u64,
}

/// Split `[0, file_size)` into at most `n` contiguous chunks. Chunks that
/// would be empty (tiny files) are dropped and the rest reindexed.
pub fn plan_chunks(file_size: u64, n: usize) -> Vec<ByteChunk> {
    let n = n.max(1) as u64;
    let mut chunks = Vec::new();
    for i in 0..n {
        let lo = file_size * i / n;
        let hi = file_size * (i + 1) / n;
        if lo < hi {
            chunks.push(ByteChunk {
                index: chunks.len(),
                lo,
                hi,
            });
        }
    }
    chunks
}

/// Scan one chunk, producing its quote census.
pub fn scan_chunk(
    source_path: &Path,
    chunk: &ByteChunk,
    buffer_len: usize,
    breaker: &CircuitBreaker,
) -> Result<QuoteCensus> {
    let source = SourceFile::open(source_path)?;
    let mut buf = vec![0u8; buffer_len];
    let mut census = QuoteCensus::default();

    let mut offset = chunk.lo;
    while offset < chunk.hi {
        if breaker.is_tripped() {
            return Err(ImportError::Cancelled);
        }
        let want = ((chunk.hi - offset) as usize).min(buf.len());
        let slice = &mut buf[..want];
        source.read_exact_at(slice, offset)?;

        for (i, &b) in slice.iter().enumerate() {
            if b == b'"' {
                census.quote_count += 1;
            } else if b == b'\n' {
                let parity = (census.quote_count & 1) as usize;
                census.newline_count[parity] += 1;
                if census.first_newline[parity].is_none() {
                    census.first_newline[parity] = Some(offset + i as u64);
                }
            }
        }
        offset += want as u64;
    }

    Ok(census)
}

/// Stitch per-chunk censuses into parse regions.
///
/// The parity of the cumulative quote count at each chunk's left edge
/// decides which of the chunk's two candidate first-newlines is a true row
/// boundary. A chunk with no newline at the required parity contributes no
/// boundary and its bytes flow into the preceding region.
pub fn stitch_regions(
    chunks: &[ByteChunk],
    censuses: &[QuoteCensus],
    file_size: u64,
) -> Result<Vec<ParseRegion>> {
    debug_assert_eq!(chunks.len(), censuses.len());
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut parity = vec![0u64; chunks.len() + 1];
    for (k, census) in censuses.iter().enumerate() {
        parity[k + 1] = parity[k] ^ (census.quote_count & 1);
    }
    if parity[chunks.len()] != 0 {
        return Err(ImportError::UnterminatedQuote { offset: file_size });
    }

    // Logical rows completed before each chunk's left edge
    let mut safe_before = vec![0u64; chunks.len()];
    for k in 1..chunks.len() {
        safe_before[k] = safe_before[k - 1] + censuses[k - 1].newline_count[parity[k - 1] as usize];
    }

    let mut regions: Vec<ParseRegion> = vec![ParseRegion {
        chunk_index: 0,
        lo: 0,
        hi: file_size,
        starting_line: 1,
    }];

    for k in 1..chunks.len() {
        let p = parity[k] as usize;
        if let Some(newline) = censuses[k].first_newline[p] {
            let boundary = newline + 1;
            if let Some(prev) = regions.last_mut() {
                prev.hi = boundary;
            }
            regions.push(ParseRegion {
                chunk_index: k,
                lo: boundary,
                hi: file_size,
                // rows before the chunk, plus the boundary newline itself
                starting_line: safe_before[k] + 2,
            });
        }
    }

    regions.retain(|r| r.lo < r.hi);
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scan_all(data: &[u8], n: usize) -> (Vec<ByteChunk>, Vec<QuoteCensus>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, data).unwrap();

        let chunks = plan_chunks(data.len() as u64, n);
        let breaker = CircuitBreaker::new();
        let censuses = chunks
            .iter()
            .map(|c| scan_chunk(&path, c, 16, &breaker).unwrap())
            .collect();
        (chunks, censuses)
    }

    #[test]
    fn chunks_cover_file_disjointly() {
        let chunks = plan_chunks(100, 3);
        assert_eq!(chunks[0].lo, 0);
        assert_eq!(chunks.last().unwrap().hi, 100);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].hi, pair[1].lo);
        }
    }

    #[test]
    fn tiny_file_collapses_chunks() {
        let chunks = plan_chunks(2, 8);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn census_counts_parities() {
        let data = b"a,\"x\ny\",b\nc,d,e\n";
        let (_, censuses) = scan_all(data, 1);
        let census = &censuses[0];
        assert_eq!(census.quote_count, 2);
        // the newline inside quotes is odd parity, the two row breaks even
        assert_eq!(census.newline_count[1], 1);
        assert_eq!(census.newline_count[0], 2);
        assert_eq!(census.first_newline[1], Some(4));
        assert_eq!(census.first_newline[0], Some(9));
    }

    #[test]
    fn stitching_single_chunk_spans_file() {
        let data = b"a,b\nc,d\n";
        let (chunks, censuses) = scan_all(data, 1);
        let regions = stitch_regions(&chunks, &censuses, data.len() as u64).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].lo, regions[0].hi), (0, 8));
        assert_eq!(regions[0].starting_line, 1);
    }

    #[test]
    fn stitching_picks_safe_newline_across_quoted_split() {
        // Split lands inside the quoted field; the embedded newline in
        // chunk 1 must not be chosen as a boundary.
        let data = b"a,\"one\ntwo\",b\nc,d,e\n";
        let (chunks, censuses) = scan_all(data, 2);
        assert!(chunks.len() == 2);
        let regions = stitch_regions(&chunks, &censuses, data.len() as u64).unwrap();

        // Second region must start after the row break at offset 13
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].lo, 0);
        assert_eq!(regions[0].hi, 14);
        assert_eq!(regions[1].lo, 14);
        assert_eq!(regions[1].hi, data.len() as u64);
        assert_eq!(regions[1].starting_line, 2);
    }

    #[test]
    fn chunk_without_safe_newline_merges_forward() {
        // Middle chunk falls entirely inside one long quoted field
        let data = b"a,\"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\",b\nq,r,s\n";
        let (chunks, censuses) = scan_all(data, 4);
        let regions = stitch_regions(&chunks, &censuses, data.len() as u64).unwrap();

        // All regions must tile the file
        assert_eq!(regions.first().unwrap().lo, 0);
        assert_eq!(regions.last().unwrap().hi, data.len() as u64);
        for pair in regions.windows(2) {
            assert_eq!(pair[0].hi, pair[1].lo);
        }
    }

    #[test]
    fn file_without_newline_is_single_region() {
        let data = b"only,one,row";
        let (chunks, censuses) = scan_all(data, 3);
        let regions = stitch_regions(&chunks, &censuses, data.len() as u64).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].hi, data.len() as u64);
    }

    #[test]
    fn unterminated_quote_detected_at_stitch() {
        let data = b"a,\"never closed\nb,c\n";
        let (chunks, censuses) = scan_all(data, 2);
        let err = stitch_regions(&chunks, &censuses, data.len() as u64).unwrap_err();
        assert!(matches!(err, ImportError::UnterminatedQuote { .. }));
    }

    #[test]
    fn cancelled_scan_returns_cancelled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, b"a,b\n").unwrap();
        let chunks = plan_chunks(4, 1);

        let breaker = CircuitBreaker::new();
        breaker.trip();
        let err = scan_chunk(&path, &chunks[0], 16, &breaker).unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
    }
}
