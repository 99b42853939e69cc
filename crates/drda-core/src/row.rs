//! Described columns and the rows a cursor delivers.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::types::SqlType;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One described column (or parameter) from a describe reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
        }
    }
}

/// Column metadata shared across all rows of a cursor.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    columns: Vec<ColumnDescriptor>,
    /// Upper-cased name -> index mapping
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create column info from described columns.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let name_to_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_ascii_uppercase(), i))
            .collect();
        Self {
            columns,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of a column by name; unquoted identifiers compare case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_ascii_uppercase()).copied()
    }

    /// Descriptor at a 0-based index.
    pub fn column(&self, index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
}

/// A single row delivered by a cursor.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by 0-based column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by 0-based column index.
    #[allow(clippy::result_large_err)]
    pub fn get_as<T>(&self, index: usize) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.len()
                ),
                parameter: None,
            })
        })?;
        T::try_from(value.clone())
    }

    /// Iterate over all values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let info = Arc::new(ColumnInfo::new(vec![
            ColumnDescriptor::new("ID", SqlType::Integer),
            ColumnDescriptor::new("Name", SqlType::VarChar),
        ]));
        Row::with_columns(info, vec![Value::Int(7), Value::Text("x".into())])
    }

    #[test]
    fn lookup_by_name_ignores_case() {
        let row = sample();
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("NAME"), Some(&Value::Text("x".into())));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn typed_access() {
        let row = sample();
        assert_eq!(row.get_as::<i64>(0).unwrap(), 7);
        assert_eq!(row.get_as::<String>(1).unwrap(), "x");
        assert!(row.get_as::<i64>(5).is_err());
    }
}
