use std::collections::HashMap;
use std::sync::Arc;

use super::TableSchema;
use crate::core::{PlatformError, Result};

/// Physical layout of one schema generation: table schemas by lowercase name.
///
/// Immutable once built; `with_table` / `without_table` return a new catalog
/// and leave the original untouched, so generations can share it cheaply.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Arc<HashMap<String, TableSchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, schema: TableSchema) -> Result<Self> {
        let key = schema.key();
        if self.tables.contains_key(&key) {
            return Err(PlatformError::SchemaCompilation(format!(
                "Table '{}' is defined twice",
                schema.name()
            )));
        }

        let mut tables = (*self.tables).clone();
        tables.insert(key, schema);
        Ok(Self {
            tables: Arc::new(tables),
        })
    }

    /// Replaces (or adds) a table layout.
    pub fn with_replaced(self, schema: TableSchema) -> Self {
        let mut tables = (*self.tables).clone();
        tables.insert(schema.key(), schema);
        Self {
            tables: Arc::new(tables),
        }
    }

    pub fn without_table(self, name: &str) -> Result<Self> {
        let key = name.to_ascii_lowercase();
        if !self.tables.contains_key(&key) {
            return Err(PlatformError::Storage(format!("Table '{}' not found", name)));
        }

        let mut tables = (*self.tables).clone();
        tables.remove(&key);
        Ok(Self {
            tables: Arc::new(tables),
        })
    }

    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_ascii_lowercase())
    }

    /// Table names, sorted for stable output.
    pub fn list_tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.values().map(|t| t.name()).collect();
        names.sort_by_key(|n| n.to_ascii_lowercase());
        names
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    #[test]
    fn test_copy_on_write() {
        let base = Catalog::new()
            .with_table(TableSchema::new(
                "Order",
                vec![Column::new("Id", DataType::Integer).primary_key()],
            ))
            .unwrap();
        let extended = base
            .clone()
            .with_table(TableSchema::new("Invoice", vec![]))
            .unwrap();

        assert_eq!(base.len(), 1);
        assert_eq!(extended.list_tables(), vec!["Invoice", "Order"]);
        assert!(extended.table_exists("ORDER"));
    }

    #[test]
    fn test_duplicate_table_is_a_compilation_error() {
        let err = Catalog::new()
            .with_table(TableSchema::new("a", vec![]))
            .unwrap()
            .with_table(TableSchema::new("A", vec![]))
            .unwrap_err();
        assert_eq!(err.reason(), "schema_compilation");
    }
}
