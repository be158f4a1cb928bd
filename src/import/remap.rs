/*!
 * In-place symbol key rewrite
 *
 * After dictionary reconciliation, every symbol-key column of every shadow
 * partition still holds worker-local keys. This phase maps the column file
 * and the worker's remap table and translates each key in place, so the
 * shadow partitions can be attached to the final table without rewriting.
 */

use std::path::Path;

use crate::error::{ImportError, Result};
use crate::import::mapped;
use crate::import::shadow::{COL_DATA_EXT, COL_REMAP_EXT, NULL_SYMBOL};

/// Rewrite the keys of one (column, partition) pair of a shadow table.
///
/// An empty partition (column file shorter than one key) is a no-op. A
/// non-null key without a remap entry means the remap table is undersized:
/// that is corruption, not an empty partition, and fails the job.
pub fn update_symbol_keys(
    shadow_root: &Path,
    partition: &str,
    column_name: &str,
    expected_rows: i64,
) -> Result<()> {
    let col_path = shadow_root
        .join(partition)
        .join(format!("{}.{}", column_name, COL_DATA_EXT));
    let col_len = std::fs::metadata(&col_path)
        .map_err(|e| ImportError::ReadFailed {
            path: col_path.clone(),
            offset: 0,
            source: e,
        })?
        .len();
    if col_len < 4 {
        return Ok(());
    }
    if col_len % 4 != 0 || expected_rows as u64 * 4 > col_len {
        return Err(ImportError::ContractViolation(format!(
            "column {} has {} bytes for {} rows",
            col_path.display(),
            col_len,
            expected_rows
        )));
    }

    let remap_path = shadow_root.join(format!("{}.{}", column_name, COL_REMAP_EXT));
    let remap_len = std::fs::metadata(&remap_path)
        .map_err(|e| ImportError::ReadFailed {
            path: remap_path.clone(),
            offset: 0,
            source: e,
        })?
        .len();
    let remap_entries = (remap_len / 4) as i64;

    let remap = if remap_len >= 4 {
        Some(mapped::map_ro(&remap_path)?)
    } else {
        None
    };
    let mut col = mapped::map_rw(&col_path)?;

    let keys = col_len as usize / 4;
    for i in 0..keys {
        let at = i * 4;
        let key = i32::from_le_bytes(col[at..at + 4].try_into().expect("4-byte key"));
        if key == NULL_SYMBOL {
            continue;
        }
        if key < 0 || key as i64 >= remap_entries {
            return Err(ImportError::ContractViolation(format!(
                "key {} in {} has no remap entry ({} entries)",
                key,
                col_path.display(),
                remap_entries
            )));
        }
        let remap = remap.as_ref().expect("non-empty remap table");
        let from = key as usize * 4;
        let final_key =
            i32::from_le_bytes(remap[from..from + 4].try_into().expect("4-byte key"));
        col[at..at + 4].copy_from_slice(&final_key.to_le_bytes());
    }

    col.flush().map_err(|e| ImportError::WriteFailed {
        path: col_path,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_keys(path: &Path, keys: &[i32]) {
        let mut bytes = Vec::new();
        for k in keys {
            bytes.extend_from_slice(&k.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    fn read_keys(path: &Path) -> Vec<i32> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn setup(keys: &[i32], remap: &[i32]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("1970-01-01")).unwrap();
        write_keys(&root.join("1970-01-01/id.d"), keys);
        write_keys(&root.join("id.r"), remap);
        (dir, root)
    }

    #[test]
    fn rewrites_keys_through_remap() {
        let (_dir, root) = setup(&[0, 1, 0, 1], &[5, 9]);
        update_symbol_keys(&root, "1970-01-01", "id", 4).unwrap();
        assert_eq!(read_keys(&root.join("1970-01-01/id.d")), vec![5, 9, 5, 9]);
    }

    #[test]
    fn null_keys_pass_through() {
        let (_dir, root) = setup(&[NULL_SYMBOL, 0], &[7]);
        update_symbol_keys(&root, "1970-01-01", "id", 2).unwrap();
        assert_eq!(
            read_keys(&root.join("1970-01-01/id.d")),
            vec![NULL_SYMBOL, 7]
        );
    }

    #[test]
    fn empty_partition_is_a_no_op() {
        let (_dir, root) = setup(&[], &[]);
        update_symbol_keys(&root, "1970-01-01", "id", 0).unwrap();
        assert!(read_keys(&root.join("1970-01-01/id.d")).is_empty());
    }

    #[test]
    fn all_null_column_with_empty_remap_is_fine() {
        let (_dir, root) = setup(&[NULL_SYMBOL, NULL_SYMBOL], &[]);
        update_symbol_keys(&root, "1970-01-01", "id", 2).unwrap();
    }

    #[test]
    fn undersized_remap_is_corruption() {
        let (_dir, root) = setup(&[0, 1, 2], &[4, 5]);
        let err = update_symbol_keys(&root, "1970-01-01", "id", 3).unwrap_err();
        assert!(matches!(err, ImportError::ContractViolation(_)));
    }

    #[test]
    fn row_count_mismatch_is_corruption() {
        let (_dir, root) = setup(&[0, 1], &[4, 5]);
        let err = update_symbol_keys(&root, "1970-01-01", "id", 3).unwrap_err();
        assert!(matches!(err, ImportError::ContractViolation(_)));
    }
}
