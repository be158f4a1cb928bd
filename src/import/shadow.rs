/*!
 * Shadow tables
 *
 * Each worker materializes its share of rows into a private table named
 * `<finalTable>_<workerIndex>`, in the engine's native columnar layout:
 * one fixed-width `.d` file per column per partition (strings add a `.o`
 * offsets file), per-column symbol dictionaries at the table root, and a
 * JSON `_meta` document. After dictionary reconciliation the partitions
 * are attached to the final table by rename.
 */

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PartitionBy;
use crate::error::{ImportError, Result};
use crate::types::{ColumnType, Schema};

pub const META_FILE: &str = "_meta";

/// Suffixes of the native format
pub const COL_DATA_EXT: &str = "d";
pub const COL_OFFSETS_EXT: &str = "o";
pub const COL_DICT_EXT: &str = "c";
pub const COL_REMAP_EXT: &str = "r";
pub const COL_INDEX_KEY_EXT: &str = "k";
pub const COL_INDEX_VALUE_EXT: &str = "v";

/// Null encodings for fixed-width columns
pub const NULL_LONG: i64 = i64::MIN;
pub const NULL_INT: i32 = i32::MIN;
pub const NULL_SYMBOL: i32 = -1;

/// Table metadata document, shared by shadow and final tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub schema: Schema,
    pub partition_by: PartitionBy,
    pub timestamp_index: usize,
    /// Partition label → row count
    pub partitions: BTreeMap<String, i64>,
    /// Indexed column name → value-block capacity
    pub indexed: BTreeMap<String, u32>,
}

impl TableMeta {
    pub fn load(table_dir: &Path) -> Result<Self> {
        let path = table_dir.join(META_FILE);
        let text = fs::read_to_string(&path).map_err(|e| ImportError::ReadFailed {
            path,
            offset: 0,
            source: e,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn store(&self, table_dir: &Path) -> Result<()> {
        let path = table_dir.join(META_FILE);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&path, text).map_err(|e| ImportError::WriteFailed { path, source: e })
    }

    pub fn is_column_indexed(&self, column: &str) -> bool {
        self.indexed.contains_key(column)
    }

    pub fn index_value_block_capacity(&self, column: &str) -> Option<u32> {
        self.indexed.get(column).copied()
    }
}

/// Append-only string → key mapping for one symbol column.
///
/// Keys are dense from zero in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SymbolDict {
    map: HashMap<String, i32>,
    ordered: Vec<String>,
}

impl SymbolDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a symbol; returns the existing key when already present.
    pub fn put(&mut self, value: &str, column: &str) -> Result<i32> {
        if let Some(&key) = self.map.get(value) {
            return Ok(key);
        }
        if self.ordered.len() >= i32::MAX as usize {
            return Err(ImportError::TooManySymbols {
                column: column.to_string(),
            });
        }
        let key = self.ordered.len() as i32;
        self.map.insert(value.to_string(), key);
        self.ordered.push(value.to_string());
        Ok(key)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn value(&self, key: i32) -> Option<&str> {
        self.ordered.get(key as usize).map(|s| s.as_str())
    }

    /// Entries in local-key order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|s| s.as_str())
    }

    /// Persist as a `.c` file: `u32` length + UTF-8 bytes per entry.
    pub fn store(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| ImportError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        for entry in &self.ordered {
            writer
                .write_all(&(entry.len() as u32).to_le_bytes())
                .and_then(|_| writer.write_all(entry.as_bytes()))
                .map_err(|e| ImportError::WriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }
        writer.flush().map_err(|e| ImportError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| ImportError::ReadFailed {
                path: path.to_path_buf(),
                offset: 0,
                source: e,
            })?;

        let mut dict = Self::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if pos + 4 > bytes.len() {
                return Err(ImportError::ContractViolation(format!(
                    "truncated dictionary {}",
                    path.display()
                )));
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&bytes[pos..pos + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            pos += 4;
            if pos + len > bytes.len() {
                return Err(ImportError::ContractViolation(format!(
                    "truncated dictionary {}",
                    path.display()
                )));
            }
            let value = std::str::from_utf8(&bytes[pos..pos + len]).map_err(|_| {
                ImportError::ContractViolation(format!(
                    "dictionary {} is not UTF-8",
                    path.display()
                ))
            })?;
            dict.put(value, "")?;
            pos += len;
        }
        Ok(dict)
    }
}

/// One parsed value staged for a row append. String payloads reference the
/// caller's per-row scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StagedValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Timestamp(i64),
    Symbol(i32),
    Str { start: usize, end: usize },
}

/// A worker's private table.
#[derive(Debug)]
pub struct ShadowTable {
    root: PathBuf,
    meta: TableMeta,
    /// Per schema column; `Some` only for symbol columns
    dicts: Vec<Option<SymbolDict>>,
}

impl ShadowTable {
    /// Create the table directory and an empty dictionary per symbol column.
    pub fn create(
        root: PathBuf,
        name: String,
        schema: Schema,
        partition_by: PartitionBy,
        timestamp_index: usize,
    ) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| ImportError::WriteFailed {
            path: root.clone(),
            source: e,
        })?;
        let dicts = schema
            .columns
            .iter()
            .map(|c| (c.col_type == ColumnType::Symbol).then(SymbolDict::new))
            .collect();
        Ok(Self {
            root,
            meta: TableMeta {
                name,
                schema,
                partition_by,
                timestamp_index,
                partitions: BTreeMap::new(),
                indexed: BTreeMap::new(),
            },
            dicts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn schema(&self) -> &Schema {
        &self.meta.schema
    }

    pub fn partition_dir(&self, label: &str) -> PathBuf {
        self.root.join(label)
    }

    pub fn dict(&self, column: usize) -> Option<&SymbolDict> {
        self.dicts.get(column).and_then(|d| d.as_ref())
    }

    /// Intern a symbol value for `column`, returning the local key.
    pub fn intern(&mut self, column: usize, value: &str) -> Result<i32> {
        let name = self.meta.schema.columns[column].name.clone();
        let dict = self.dicts[column].as_mut().ok_or_else(|| {
            ImportError::ContractViolation(format!("column '{}' is not a symbol column", name))
        })?;
        dict.put(value, &name)
    }

    /// Record a committed partition and its row count.
    pub fn record_partition(&mut self, label: &str, rows: i64) {
        *self.meta.partitions.entry(label.to_string()).or_insert(0) += rows;
    }

    pub fn mark_indexed(&mut self, column: &str, capacity: u32) {
        self.meta.indexed.insert(column.to_string(), capacity);
    }

    /// Persist dictionaries and metadata. Called as part of the sync commit
    /// at the end of every partition-import task.
    pub fn store(&self) -> Result<()> {
        for (i, dict) in self.dicts.iter().enumerate() {
            if let Some(dict) = dict {
                let name = &self.meta.schema.columns[i].name;
                dict.store(&self.root.join(format!("{}.{}", name, COL_DICT_EXT)))?;
            }
        }
        self.meta.store(&self.root)
    }

    /// Remove a partition that failed mid-append, with nothing recorded.
    pub fn rollback_partition(&self, label: &str) {
        let dir = self.partition_dir(label);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!("failed to roll back partition {}: {}", dir.display(), e);
            }
        }
    }
}

/// Column-file writer for one partition of a shadow table.
#[derive(Debug)]
pub struct PartitionAppender {
    dir: PathBuf,
    cols: Vec<ColumnFile>,
    rows: u64,
}

#[derive(Debug)]
enum ColumnFile {
    Fixed {
        path: PathBuf,
        writer: BufWriter<File>,
    },
    Str {
        offsets_path: PathBuf,
        offsets: BufWriter<File>,
        data_path: PathBuf,
        data: BufWriter<File>,
        data_len: u64,
    },
}

impl PartitionAppender {
    pub fn create(dir: PathBuf, schema: &Schema) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| ImportError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;

        let mut cols = Vec::with_capacity(schema.len());
        for col in &schema.columns {
            let data_path = dir.join(format!("{}.{}", col.name, COL_DATA_EXT));
            let data = File::create(&data_path).map_err(|e| ImportError::WriteFailed {
                path: data_path.clone(),
                source: e,
            })?;
            if col.col_type == ColumnType::String {
                let offsets_path = dir.join(format!("{}.{}", col.name, COL_OFFSETS_EXT));
                let offsets = File::create(&offsets_path).map_err(|e| {
                    ImportError::WriteFailed {
                        path: offsets_path.clone(),
                        source: e,
                    }
                })?;
                cols.push(ColumnFile::Str {
                    offsets_path,
                    offsets: BufWriter::new(offsets),
                    data_path,
                    data: BufWriter::new(data),
                    data_len: 0,
                });
            } else {
                cols.push(ColumnFile::Fixed {
                    path: data_path,
                    writer: BufWriter::new(data),
                });
            }
        }

        Ok(Self { dir, cols, rows: 0 })
    }

    pub fn row_count(&self) -> u64 {
        self.rows
    }

    /// Append one staged row. `scratch` backs `StagedValue::Str` ranges.
    ///
    /// The caller stages the full row before calling, so a parse failure in
    /// any field never leaves a partial row behind.
    pub fn append_row(
        &mut self,
        schema: &Schema,
        values: &[StagedValue],
        scratch: &[u8],
    ) -> Result<()> {
        debug_assert_eq!(values.len(), self.cols.len());
        for (i, col) in self.cols.iter_mut().enumerate() {
            let value = values[i];
            match col {
                ColumnFile::Fixed { path, writer } => {
                    let col_type = schema.columns[i].col_type;
                    write_fixed(writer, col_type, value).map_err(|e| {
                        ImportError::WriteFailed {
                            path: path.clone(),
                            source: e,
                        }
                    })?;
                }
                ColumnFile::Str {
                    offsets_path,
                    offsets,
                    data_path,
                    data,
                    data_len,
                } => {
                    let bytes: &[u8] = match value {
                        StagedValue::Str { start, end } => &scratch[start..end],
                        StagedValue::Null => &[],
                        other => {
                            return Err(ImportError::ContractViolation(format!(
                                "staged {:?} for string column", other
                            )))
                        }
                    };
                    data.write_all(bytes).map_err(|e| ImportError::WriteFailed {
                        path: data_path.clone(),
                        source: e,
                    })?;
                    *data_len += bytes.len() as u64;
                    offsets
                        .write_all(&data_len.to_le_bytes())
                        .map_err(|e| ImportError::WriteFailed {
                            path: offsets_path.clone(),
                            source: e,
                        })?;
                }
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Flush and sync every column file.
    pub fn commit(mut self) -> Result<u64> {
        for col in self.cols.iter_mut() {
            match col {
                ColumnFile::Fixed { path, writer } => sync_writer(writer, path)?,
                ColumnFile::Str {
                    offsets_path,
                    offsets,
                    data_path,
                    data,
                    ..
                } => {
                    sync_writer(offsets, offsets_path)?;
                    sync_writer(data, data_path)?;
                }
            }
        }
        Ok(self.rows)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn sync_writer(writer: &mut BufWriter<File>, path: &Path) -> Result<()> {
    writer
        .flush()
        .and_then(|_| writer.get_ref().sync_all())
        .map_err(|e| ImportError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

fn write_fixed(
    writer: &mut BufWriter<File>,
    col_type: ColumnType,
    value: StagedValue,
) -> std::io::Result<()> {
    match (col_type, value) {
        (ColumnType::Boolean, StagedValue::Bool(v)) => writer.write_all(&[v as u8]),
        (ColumnType::Boolean, StagedValue::Null) => writer.write_all(&[0u8]),
        (ColumnType::Int, StagedValue::Int(v)) => writer.write_all(&v.to_le_bytes()),
        (ColumnType::Int, StagedValue::Null) => writer.write_all(&NULL_INT.to_le_bytes()),
        (ColumnType::Long, StagedValue::Long(v)) => writer.write_all(&v.to_le_bytes()),
        (ColumnType::Long, StagedValue::Null) => writer.write_all(&NULL_LONG.to_le_bytes()),
        (ColumnType::Double, StagedValue::Double(v)) => writer.write_all(&v.to_le_bytes()),
        (ColumnType::Double, StagedValue::Null) => {
            writer.write_all(&f64::NAN.to_le_bytes())
        }
        (ColumnType::Timestamp, StagedValue::Timestamp(v)) => {
            writer.write_all(&v.to_le_bytes())
        }
        (ColumnType::Timestamp, StagedValue::Null) => {
            writer.write_all(&NULL_LONG.to_le_bytes())
        }
        (ColumnType::Symbol, StagedValue::Symbol(v)) => writer.write_all(&v.to_le_bytes()),
        (ColumnType::Symbol, StagedValue::Null) => {
            writer.write_all(&NULL_SYMBOL.to_le_bytes())
        }
        (t, v) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("staged {:?} for {} column", v, t.name()),
        )),
    }
}
