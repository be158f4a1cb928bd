/*!
 * Symbol dictionary reconciliation
 *
 * Each worker built its own dense dictionary per symbol column. This phase
 * unions them into the final table's dictionary and writes one remap file
 * per (worker, column): an `i32` array indexed by the worker's local key
 * yielding the final key. Tasks are partitioned by column, so at most one
 * task ever mutates a given final dictionary.
 */

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{ImportError, Result};
use crate::import::shadow::{ShadowTable, SymbolDict, COL_DICT_EXT, COL_REMAP_EXT};

/// What one merge task hands back to the coordinator.
#[derive(Debug, Clone)]
pub struct SymbolMergeReport {
    pub column: usize,
    /// Distinct symbols in the final dictionary after the union
    pub final_symbols: usize,
}

/// Union the per-worker dictionaries for `column` into the final table's
/// dictionary and emit a remap file into each shadow table root.
pub fn merge_symbol_column(
    column: usize,
    final_dir: &Path,
    shadows: &[ShadowTable],
) -> Result<SymbolMergeReport> {
    let column_name = shadows
        .first()
        .map(|s| s.schema().columns[column].name.clone())
        .ok_or_else(|| ImportError::ContractViolation("no shadow tables to merge".to_string()))?;

    let dict_path = final_dir.join(format!("{}.{}", column_name, COL_DICT_EXT));
    // A pre-existing destination dictionary keeps its keys; putSymbol is
    // idempotent on the strings it already contains
    let mut final_dict = if dict_path.exists() {
        SymbolDict::load(&dict_path)?
    } else {
        SymbolDict::new()
    };

    for shadow in shadows {
        let local = shadow.dict(column).ok_or_else(|| {
            ImportError::ContractViolation(format!(
                "column '{}' has no dictionary in {}",
                column_name,
                shadow.root().display()
            ))
        })?;

        let remap_path = shadow
            .root()
            .join(format!("{}.{}", column_name, COL_REMAP_EXT));
        let file = File::create(&remap_path).map_err(|e| ImportError::WriteFailed {
            path: remap_path.clone(),
            source: e,
        })?;
        let mut remap = BufWriter::new(file);

        for value in local.iter() {
            let final_key = final_dict.put(value, &column_name)?;
            remap
                .write_all(&final_key.to_le_bytes())
                .map_err(|e| ImportError::WriteFailed {
                    path: remap_path.clone(),
                    source: e,
                })?;
        }
        remap.flush().map_err(|e| ImportError::WriteFailed {
            path: remap_path,
            source: e,
        })?;
    }

    final_dict.store(&dict_path)?;
    Ok(SymbolMergeReport {
        column,
        final_symbols: final_dict.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionBy;
    use crate::types::Schema;
    use tempfile::tempdir;

    fn shadow(dir: &Path, worker: usize, symbols: &[&str]) -> ShadowTable {
        let schema = Schema::parse("id:symbol,ts:timestamp").unwrap();
        let mut shadow = ShadowTable::create(
            dir.join(format!("t_{}", worker)),
            format!("t_{}", worker),
            schema,
            PartitionBy::Day,
            1,
        )
        .unwrap();
        for s in symbols {
            shadow.intern(0, s).unwrap();
        }
        shadow
    }

    fn read_remap(path: &Path) -> Vec<i32> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn unions_worker_dictionaries() {
        let dir = tempdir().unwrap();
        let final_dir = dir.path().join("t");
        std::fs::create_dir_all(&final_dir).unwrap();

        // worker 0: {A:0, B:1}; worker 1: {B:0, C:1}
        let shadows = vec![
            shadow(dir.path(), 0, &["A", "B"]),
            shadow(dir.path(), 1, &["B", "C"]),
        ];

        let report = merge_symbol_column(0, &final_dir, &shadows).unwrap();
        assert_eq!(report.final_symbols, 3);

        let final_dict = SymbolDict::load(&final_dir.join("id.c")).unwrap();
        assert_eq!(final_dict.value(0), Some("A"));
        assert_eq!(final_dict.value(1), Some("B"));
        assert_eq!(final_dict.value(2), Some("C"));

        assert_eq!(read_remap(&shadows[0].root().join("id.r")), vec![0, 1]);
        assert_eq!(read_remap(&shadows[1].root().join("id.r")), vec![1, 2]);
    }

    #[test]
    fn remap_length_matches_local_dictionary() {
        let dir = tempdir().unwrap();
        let final_dir = dir.path().join("t");
        std::fs::create_dir_all(&final_dir).unwrap();

        let shadows = vec![shadow(dir.path(), 0, &["x", "y", "z"])];
        merge_symbol_column(0, &final_dir, &shadows).unwrap();

        let remap = std::fs::metadata(shadows[0].root().join("id.r")).unwrap();
        assert_eq!(remap.len(), 3 * 4);
    }

    #[test]
    fn existing_final_dictionary_keeps_its_keys() {
        let dir = tempdir().unwrap();
        let final_dir = dir.path().join("t");
        std::fs::create_dir_all(&final_dir).unwrap();

        let mut existing = SymbolDict::new();
        existing.put("OLD", "id").unwrap();
        existing.store(&final_dir.join("id.c")).unwrap();

        let shadows = vec![shadow(dir.path(), 0, &["NEW", "OLD"])];
        let report = merge_symbol_column(0, &final_dir, &shadows).unwrap();
        assert_eq!(report.final_symbols, 2);

        // OLD keeps key 0; NEW is appended
        assert_eq!(read_remap(&shadows[0].root().join("id.r")), vec![1, 0]);
    }

    #[test]
    fn empty_worker_dictionary_writes_empty_remap() {
        let dir = tempdir().unwrap();
        let final_dir = dir.path().join("t");
        std::fs::create_dir_all(&final_dir).unwrap();

        let shadows = vec![shadow(dir.path(), 0, &[])];
        merge_symbol_column(0, &final_dir, &shadows).unwrap();
        let remap = std::fs::metadata(shadows[0].root().join("id.r")).unwrap();
        assert_eq!(remap.len(), 0);
    }
}
