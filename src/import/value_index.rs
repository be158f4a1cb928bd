/*!
 * Value-list indexes
 *
 * For an indexed symbol column, each partition gets a posting list: the
 * value file (`.v`) holds the row ids of every key, grouped per key in
 * fixed-capacity blocks, and the key file (`.k`) holds one
 * `(value_count, value_offset)` pair per key, dense from key zero. Row ids
 * are partition-relative. NULL keys are not indexed.
 */

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ImportError, Result};
use crate::import::shadow::{
    COL_DATA_EXT, COL_INDEX_KEY_EXT, COL_INDEX_VALUE_EXT, NULL_SYMBOL,
};

/// What one index-build task hands back to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct IndexBuildReport {
    /// Distinct keys covered by the key file, dense from zero
    pub keys: u64,
    /// Row ids written across all keys
    pub values: u64,
}

/// Build the `.k`/`.v` pair for one (partition, column).
pub fn build_value_index(
    partition_dir: &Path,
    column_name: &str,
    value_block_capacity: u32,
) -> Result<IndexBuildReport> {
    if value_block_capacity == 0 {
        return Err(ImportError::ContractViolation(format!(
            "zero value-block capacity for column '{}'",
            column_name
        )));
    }
    let col_path = partition_dir.join(format!("{}.{}", column_name, COL_DATA_EXT));
    let bytes = fs::read(&col_path).map_err(|e| ImportError::ReadFailed {
        path: col_path.clone(),
        offset: 0,
        source: e,
    })?;
    if bytes.len() % 4 != 0 {
        return Err(ImportError::ContractViolation(format!(
            "key column {} has size {}",
            col_path.display(),
            bytes.len()
        )));
    }

    // Bucket row ids per key
    let mut postings: Vec<Vec<u64>> = Vec::new();
    for (row, chunk) in bytes.chunks_exact(4).enumerate() {
        let key = i32::from_le_bytes(chunk.try_into().expect("4-byte key"));
        if key == NULL_SYMBOL {
            continue;
        }
        if key < 0 {
            return Err(ImportError::ContractViolation(format!(
                "negative key {} in {}",
                key,
                col_path.display()
            )));
        }
        let key = key as usize;
        if key >= postings.len() {
            postings.resize_with(key + 1, Vec::new);
        }
        postings[key].push(row as u64);
    }

    let key_path = partition_dir.join(format!("{}.{}", column_name, COL_INDEX_KEY_EXT));
    let value_path = partition_dir.join(format!("{}.{}", column_name, COL_INDEX_VALUE_EXT));
    let mut keys = open_writer(&key_path)?;
    let mut values = open_writer(&value_path)?;

    let capacity = value_block_capacity as u64;
    let mut value_offset = 0u64;
    let mut total_values = 0u64;
    for rows in &postings {
        write_all(&mut keys, &key_path, &(rows.len() as i64).to_le_bytes())?;
        write_all(&mut keys, &key_path, &(value_offset as i64).to_le_bytes())?;

        for &row in rows {
            write_all(&mut values, &value_path, &row.to_le_bytes())?;
        }
        total_values += rows.len() as u64;

        // Pad the key's last block to full capacity
        let blocks = (rows.len() as u64).div_ceil(capacity);
        let padded = blocks * capacity;
        for _ in rows.len() as u64..padded {
            write_all(&mut values, &value_path, &0u64.to_le_bytes())?;
        }
        value_offset += padded * 8;
    }

    finish_writer(keys, &key_path)?;
    finish_writer(values, &value_path)?;

    Ok(IndexBuildReport {
        keys: postings.len() as u64,
        values: total_values,
    })
}

fn open_writer(path: &PathBuf) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| ImportError::WriteFailed {
            path: path.clone(),
            source: e,
        })
}

fn write_all(writer: &mut BufWriter<File>, path: &Path, bytes: &[u8]) -> Result<()> {
    writer
        .write_all(bytes)
        .map_err(|e| ImportError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

fn finish_writer(mut writer: BufWriter<File>, path: &Path) -> Result<()> {
    writer
        .flush()
        .and_then(|_| writer.get_ref().sync_all())
        .map_err(|e| ImportError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
