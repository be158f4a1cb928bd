/*!
 * Target schema: column types, index declarations, schema text parsing
 */

pub mod timestamp;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use timestamp::TimestampParser;

/// Column storage types understood by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Int,
    Long,
    Double,
    String,
    Symbol,
    Timestamp,
}

impl ColumnType {
    /// Width in bytes of the fixed-size representation, if fixed-width.
    /// STRING columns use an offsets file plus a variable-length data file.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ColumnType::Boolean => Some(1),
            ColumnType::Int => Some(4),
            ColumnType::Symbol => Some(4),
            ColumnType::Long => Some(8),
            ColumnType::Double => Some(8),
            ColumnType::Timestamp => Some(8),
            ColumnType::String => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Symbol => "symbol",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

/// Schema text parse failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("empty schema")]
    Empty,
    #[error("column '{0}': missing type")]
    MissingType(String),
    #[error("column '{name}': unknown type '{type_name}'")]
    UnknownType { name: String, type_name: String },
    #[error("column '{0}': only symbol columns can be indexed")]
    IndexOnNonSymbol(String),
    #[error("column '{name}': bad index capacity '{capacity}'")]
    BadCapacity { name: String, capacity: String },
    #[error("column '{name}': unknown modifier '{modifier}'")]
    UnknownModifier { name: String, modifier: String },
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
}

/// One column of the target table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: ColumnType,
    /// Build a value-list index for this column in the final phase
    #[serde(default)]
    pub indexed: bool,
    /// Value-block capacity override; falls back to the job-level setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_capacity: Option<u32>,
}

/// Ordered list of target columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Parse schema text of the form
    /// `name:type[,name:type:index[(capacity)]]...`, e.g.
    /// `sensor_id:symbol:index(256),temperature:double,ts:timestamp`.
    pub fn parse(text: &str) -> std::result::Result<Self, SchemaError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut columns = Vec::new();
        for part in text.split(',') {
            let mut bits = part.trim().splitn(3, ':');
            let name = bits.next().unwrap_or("").trim().to_string();
            let type_name = bits
                .next()
                .ok_or_else(|| SchemaError::MissingType(name.clone()))?
                .trim()
                .to_lowercase();

            let col_type = match type_name.as_str() {
                "boolean" | "bool" => ColumnType::Boolean,
                "int" => ColumnType::Int,
                "long" => ColumnType::Long,
                "double" => ColumnType::Double,
                "string" => ColumnType::String,
                "symbol" => ColumnType::Symbol,
                "timestamp" => ColumnType::Timestamp,
                _ => {
                    return Err(SchemaError::UnknownType {
                        name,
                        type_name,
                    })
                }
            };

            let mut indexed = false;
            let mut index_capacity = None;
            if let Some(extra) = bits.next() {
                let extra = extra.trim().to_lowercase();
                let rest = extra.strip_prefix("index").ok_or_else(|| {
                    SchemaError::UnknownModifier {
                        name: name.clone(),
                        modifier: extra.clone(),
                    }
                })?;
                indexed = true;
                let rest = rest.trim();
                if !rest.is_empty() {
                    let cap_text = rest
                        .strip_prefix('(')
                        .and_then(|r| r.strip_suffix(')'))
                        .ok_or_else(|| SchemaError::BadCapacity {
                            name: name.clone(),
                            capacity: rest.to_string(),
                        })?;
                    let cap: u32 = cap_text.trim().parse().map_err(|_| {
                        SchemaError::BadCapacity {
                            name: name.clone(),
                            capacity: cap_text.to_string(),
                        }
                    })?;
                    index_capacity = Some(cap);
                }
            }

            if indexed && col_type != ColumnType::Symbol {
                return Err(SchemaError::IndexOnNonSymbol(name));
            }
            if columns.iter().any(|c: &ColumnSpec| c.name == name) {
                return Err(SchemaError::DuplicateColumn(name));
            }

            columns.push(ColumnSpec {
                name,
                col_type,
                indexed,
                index_capacity,
            });
        }

        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Indices of symbol-typed columns
    pub fn symbol_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.col_type == ColumnType::Symbol)
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of columns with a value-list index declared
    pub fn indexed_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.indexed)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_schema() {
        let schema = Schema::parse("sensor_id:symbol,temperature:double,ts:timestamp").unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.columns[0].col_type, ColumnType::Symbol);
        assert_eq!(schema.columns[1].col_type, ColumnType::Double);
        assert_eq!(schema.column_index("ts"), Some(2));
        assert!(schema.indexed_columns().is_empty());
    }

    #[test]
    fn parses_index_declaration() {
        let schema = Schema::parse("id:symbol:index(512),ts:timestamp").unwrap();
        assert!(schema.columns[0].indexed);
        assert_eq!(schema.columns[0].index_capacity, Some(512));
        assert_eq!(schema.indexed_columns(), vec![0]);
    }

    #[test]
    fn index_without_capacity_uses_default() {
        let schema = Schema::parse("id:symbol:index,ts:timestamp").unwrap();
        assert!(schema.columns[0].indexed);
        assert_eq!(schema.columns[0].index_capacity, None);
    }

    #[test]
    fn rejects_index_on_non_symbol() {
        let err = Schema::parse("v:double:index,ts:timestamp").unwrap_err();
        assert_eq!(err, SchemaError::IndexOnNonSymbol("v".to_string()));
    }

    #[test]
    fn rejects_unknown_modifier() {
        assert!(matches!(
            Schema::parse("a:symbol:primary,ts:timestamp"),
            Err(SchemaError::UnknownModifier { .. })
        ));
    }

    #[test]
    fn rejects_unknown_type_and_duplicates() {
        assert!(matches!(
            Schema::parse("a:varchar"),
            Err(SchemaError::UnknownType { .. })
        ));
        assert_eq!(
            Schema::parse("a:long,a:int").unwrap_err(),
            SchemaError::DuplicateColumn("a".to_string())
        );
    }

    #[test]
    fn symbol_columns_listed_in_order() {
        let schema = Schema::parse("a:symbol,b:long,c:symbol,ts:timestamp").unwrap();
        assert_eq!(schema.symbol_columns(), vec![0, 2]);
    }

    #[test]
    fn fixed_widths_match_storage() {
        assert_eq!(ColumnType::Boolean.fixed_width(), Some(1));
        assert_eq!(ColumnType::Symbol.fixed_width(), Some(4));
        assert_eq!(ColumnType::Timestamp.fixed_width(), Some(8));
        assert_eq!(ColumnType::String.fixed_width(), None);
    }
}
