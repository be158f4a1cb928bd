/*!
 * Timestamp index files
 *
 * The indexing pass appends fixed-size `(timestamp, offset)` records to one
 * file per (chunk, partition). The partition-import pass merges every chunk
 * file of a partition into `INDEX.m`, ascending by timestamp, with ties
 * broken by chunk then source offset so equal timestamps keep source order.
 */

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{ImportError, Result};
use crate::import::mapped;

/// On-disk size of one index record
pub const INDEX_ENTRY_BYTES: usize = 16;

/// Name of the merged per-partition index
pub const MERGED_INDEX_NAME: &str = "INDEX.m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: i64,
    /// Byte offset of the row's first byte in the source file
    pub offset: i64,
}

impl IndexEntry {
    pub fn to_bytes(self) -> [u8; INDEX_ENTRY_BYTES] {
        let mut out = [0u8; INDEX_ENTRY_BYTES];
        out[..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut ts = [0u8; 8];
        let mut off = [0u8; 8];
        ts.copy_from_slice(&bytes[..8]);
        off.copy_from_slice(&bytes[8..16]);
        Self {
            timestamp: i64::from_le_bytes(ts),
            offset: i64::from_le_bytes(off),
        }
    }
}

/// Append-only index writer for one chunk, one file per partition touched.
#[derive(Debug)]
pub struct ChunkIndexWriter {
    dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl ChunkIndexWriter {
    pub fn new(import_root: &Path, chunk_index: usize) -> Result<Self> {
        let dir = import_root.join(chunk_index.to_string());
        fs::create_dir_all(&dir).map_err(|e| ImportError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self {
            dir,
            writers: HashMap::new(),
        })
    }

    pub fn append(&mut self, partition: &str, entry: IndexEntry) -> Result<()> {
        if !self.writers.contains_key(partition) {
            let path = self.dir.join(partition);
            let file = File::create(&path).map_err(|e| ImportError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
            self.writers
                .insert(partition.to_string(), BufWriter::new(file));
        }
        let writer = self.writers.get_mut(partition).expect("writer just inserted");
        writer
            .write_all(&entry.to_bytes())
            .map_err(|e| ImportError::WriteFailed {
                path: self.dir.join(partition),
                source: e,
            })
    }

    /// Flush all partition files and return the touched partition keys.
    pub fn finish(mut self) -> Result<Vec<String>> {
        let mut partitions = Vec::with_capacity(self.writers.len());
        for (partition, writer) in self.writers.iter_mut() {
            writer.flush().map_err(|e| ImportError::WriteFailed {
                path: self.dir.join(partition),
                source: e,
            })?;
            partitions.push(partition.clone());
        }
        partitions.sort();
        Ok(partitions)
    }
}

/// Merged, timestamp-ordered index for one partition.
///
/// Holds the mapping for the lifetime of the partition import; dropping it
/// unmaps `INDEX.m`.
#[derive(Debug)]
pub struct MergedIndex {
    map: Option<Mmap>,
    count: usize,
}

impl MergedIndex {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entry(&self, i: usize) -> IndexEntry {
        let map = self.map.as_ref().expect("non-empty index has a mapping");
        let start = i * INDEX_ENTRY_BYTES;
        IndexEntry::from_bytes(&map[start..start + INDEX_ENTRY_BYTES])
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.count).map(|i| self.entry(i))
    }
}

fn entry_count(path: &Path, len: u64) -> Result<usize> {
    if len % INDEX_ENTRY_BYTES as u64 != 0 {
        return Err(ImportError::ContractViolation(format!(
            "index file {} has size {} not divisible by {}",
            path.display(),
            len,
            INDEX_ENTRY_BYTES
        )));
    }
    Ok((len / INDEX_ENTRY_BYTES as u64) as usize)
}

/// K-way merge of a partition's chunk index files into `INDEX.m`.
///
/// `chunk_files` pairs each file with its chunk index; the pairs must be in
/// ascending chunk order for the tie-break to reproduce source order.
pub fn merge_partition_index(
    import_root: &Path,
    partition: &str,
    chunk_files: &[(usize, PathBuf)],
) -> Result<MergedIndex> {
    let mut inputs = Vec::with_capacity(chunk_files.len());
    let mut total = 0usize;
    for (chunk, path) in chunk_files {
        let len = fs::metadata(path)
            .map_err(|e| ImportError::ReadFailed {
                path: path.clone(),
                offset: 0,
                source: e,
            })?
            .len();
        let count = entry_count(path, len)?;
        total += count;
        if count > 0 {
            inputs.push((*chunk, mapped::map_ro(path)?, count));
        }
    }

    let out_dir = import_root.join(partition);
    fs::create_dir_all(&out_dir).map_err(|e| ImportError::WriteFailed {
        path: out_dir.clone(),
        source: e,
    })?;
    let out_path = out_dir.join(MERGED_INDEX_NAME);
    let out_file = File::create(&out_path).map_err(|e| ImportError::WriteFailed {
        path: out_path.clone(),
        source: e,
    })?;
    out_file
        .set_len((total * INDEX_ENTRY_BYTES) as u64)
        .map_err(|e| ImportError::WriteFailed {
            path: out_path.clone(),
            source: e,
        })?;
    drop(out_file);

    if total == 0 {
        return Ok(MergedIndex {
            map: None,
            count: 0,
        });
    }

    let mut out = mapped::map_rw(&out_path)?;

    // Min-heap keyed by (timestamp, chunk, offset): stable within equal
    // timestamps because chunk files are themselves in offset order.
    let mut heap: BinaryHeap<Reverse<(i64, usize, i64, usize)>> = BinaryHeap::new();
    let mut cursors = vec![0usize; inputs.len()];
    for (slot, (chunk, map, _)) in inputs.iter().enumerate() {
        let entry = IndexEntry::from_bytes(&map[..INDEX_ENTRY_BYTES]);
        heap.push(Reverse((entry.timestamp, *chunk, entry.offset, slot)));
    }

    let mut written = 0usize;
    while let Some(Reverse((ts, _chunk, offset, slot))) = heap.pop() {
        let dst = written * INDEX_ENTRY_BYTES;
        out[dst..dst + INDEX_ENTRY_BYTES].copy_from_slice(
            &IndexEntry {
                timestamp: ts,
                offset,
            }
            .to_bytes(),
        );
        written += 1;

        cursors[slot] += 1;
        let (chunk, map, count) = &inputs[slot];
        if cursors[slot] < *count {
            let start = cursors[slot] * INDEX_ENTRY_BYTES;
            let entry = IndexEntry::from_bytes(&map[start..start + INDEX_ENTRY_BYTES]);
            heap.push(Reverse((entry.timestamp, *chunk, entry.offset, slot)));
        }
    }
    debug_assert_eq!(written, total);

    out.flush().map_err(|e| ImportError::WriteFailed {
        path: out_path.clone(),
        source: e,
    })?;
    let map = out.make_read_only().map_err(|e| ImportError::MmapFailed {
        path: out_path,
        source: e,
    })?;

    Ok(MergedIndex {
        map: Some(map),
        count: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_entries(root: &Path, chunk: usize, partition: &str, entries: &[(i64, i64)]) -> PathBuf {
        let mut writer = ChunkIndexWriter::new(root, chunk).unwrap();
        for &(ts, off) in entries {
            writer
                .append(
                    partition,
                    IndexEntry {
                        timestamp: ts,
                        offset: off,
                    },
                )
                .unwrap();
        }
        let touched = writer.finish().unwrap();
        assert_eq!(touched, vec![partition.to_string()]);
        root.join(chunk.to_string()).join(partition)
    }

    #[test]
    fn entry_roundtrip_is_16_bytes() {
        let entry = IndexEntry {
            timestamp: -7,
            offset: 1 << 40,
        };
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(IndexEntry::from_bytes(&bytes), entry);
    }

    #[test]
    fn merge_orders_by_timestamp() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let a = write_entries(root, 0, "1970-01-01", &[(5, 0), (1, 20), (9, 40)]);
        let b = write_entries(root, 1, "1970-01-01", &[(3, 100), (7, 120)]);

        let merged =
            merge_partition_index(root, "1970-01-01", &[(0, a), (1, b)]).unwrap();
        let timestamps: Vec<i64> = merged.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![1, 3, 5, 7, 9]);
        assert!(root.join("1970-01-01").join(MERGED_INDEX_NAME).exists());
    }

    #[test]
    fn merge_breaks_timestamp_ties_by_chunk_then_offset() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let a = write_entries(root, 0, "p", &[(5, 30), (5, 60)]);
        let b = write_entries(root, 1, "p", &[(5, 10)]);

        let merged = merge_partition_index(root, "p", &[(0, a), (1, b)]).unwrap();
        let offsets: Vec<i64> = merged.iter().map(|e| e.offset).collect();
        // chunk 0 entries first (in offset order), then chunk 1
        assert_eq!(offsets, vec![30, 60, 10]);
    }

    #[test]
    fn merge_of_empty_inputs_is_empty() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let path = root.join("0").join("p");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();

        let merged = merge_partition_index(root, "p", &[(0, path)]).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn corrupt_index_size_is_contract_violation() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let path = root.join("0").join("p");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [0u8; 10]).unwrap();

        let err = merge_partition_index(root, "p", &[(0, path)]).unwrap_err();
        assert!(matches!(err, ImportError::ContractViolation(_)));
    }
}
