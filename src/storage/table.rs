use crate::core::{Column, PlatformError, Result, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Physical layout of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercased name; the catalog and storage key tables by it.
    pub fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }
}

/// Exact hash-map form of a key value.
///
/// `Value` equality is numeric (`Integer(3) == Float(3.0)`, floats within an
/// epsilon) so it cannot back a hash index; whole floats fold into integers
/// here and every other float keys by its bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Integer(i64),
    Float(u64),
    Text(String),
    Guid(Uuid),
    Other(String),
}

impl IndexKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Integer(i) => Self::Integer(*i),
            Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Self::Integer(*f as i64)
            }
            Value::Float(f) => Self::Float(f.to_bits()),
            Value::Text(s) => Self::Text(s.clone()),
            Value::Guid(g) => Self::Guid(*g),
            other => Self::Other(format!("{}:{}", other.type_name(), other)),
        }
    }
}

/// Rows of one table addressed by a stable row id.
///
/// Row ids never get reused, so the undo log can put a deleted row back at
/// its original position.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    key_index: HashMap<IndexKey, usize>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            key_index: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn insert(&mut self, row: Row) -> Result<usize> {
        let id = self.next_row_id;
        self.insert_at(id, row)?;
        self.next_row_id += 1;
        Ok(id)
    }

    /// Re-inserts a row under a known id (undo of a delete).
    pub fn restore(&mut self, id: usize, row: Row) -> Result<()> {
        if self.rows.contains_key(&id) {
            return Err(PlatformError::Storage(format!(
                "Row {} already exists in '{}'",
                id,
                self.schema.name()
            )));
        }
        self.insert_at(id, row)?;
        self.next_row_id = self.next_row_id.max(id + 1);
        Ok(())
    }

    fn insert_at(&mut self, id: usize, row: Row) -> Result<()> {
        self.validate_row(&row)?;
        if let Some(key) = self.key_of(&row) {
            let index_key = IndexKey::of(&key);
            if self.key_index.contains_key(&index_key) {
                return Err(self.duplicate(&key));
            }
            self.key_index.insert(index_key, id);
        }
        self.rows.insert(id, row);
        Ok(())
    }

    /// Replaces a row, returning the previous contents.
    pub fn update(&mut self, id: usize, new_row: Row) -> Result<Row> {
        self.validate_row(&new_row)?;
        let old_key = match self.rows.get(&id) {
            Some(old) => self.key_of(old),
            None => {
                return Err(PlatformError::Storage(format!(
                    "Row {} not found in '{}'",
                    id,
                    self.schema.name()
                )));
            }
        };
        let new_key = self.key_of(&new_row);
        let old_index = old_key.as_ref().map(IndexKey::of);
        let new_index = new_key.as_ref().map(IndexKey::of);

        if new_index != old_index {
            if let (Some(key), Some(index_key)) = (&new_key, &new_index)
                && self.key_index.contains_key(index_key)
            {
                return Err(self.duplicate(key));
            }
            if let Some(index_key) = &old_index {
                self.key_index.remove(index_key);
            }
            if let Some(index_key) = new_index {
                self.key_index.insert(index_key, id);
            }
        }

        self.rows
            .insert(id, new_row)
            .ok_or_else(|| PlatformError::Storage(format!("Row {} vanished", id)))
    }

    pub fn delete(&mut self, id: usize) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        if let Some(key) = self.key_of(&row) {
            self.key_index.remove(&IndexKey::of(&key));
        }
        Some(row)
    }

    pub fn get(&self, id: usize) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn find_by_key(&self, key: &Value) -> Option<(usize, &Row)> {
        let id = *self.key_index.get(&IndexKey::of(key))?;
        self.rows.get(&id).map(|row| (id, row))
    }

    pub fn scan(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    pub fn scan_with_ids(&self) -> Vec<(usize, Row)> {
        self.rows.iter().map(|(id, row)| (*id, row.clone())).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Largest integer key currently stored.
    pub fn max_integer_key(&self) -> Option<i64> {
        self.key_index
            .keys()
            .filter_map(|key| match key {
                IndexKey::Integer(i) => Some(*i),
                _ => None,
            })
            .max()
    }

    /// Builds a copy of this table laid out as `target`.
    ///
    /// Columns are matched by name. New NOT NULL columns are filled with the
    /// type default; a NULL landing in a NOT NULL column, a value that cannot
    /// be converted, or colliding keys fail the whole rebuild.
    pub fn migrate(&self, target: TableSchema) -> Result<Table> {
        let sources: Vec<Option<usize>> = target
            .columns()
            .iter()
            .map(|c| self.schema.find_column_index(&c.name))
            .collect();

        let mut migrated = Table::new(target);
        migrated.next_row_id = self.next_row_id;

        for (id, row) in &self.rows {
            let mut new_row = Vec::with_capacity(sources.len());
            for (column, source) in migrated.schema.columns().iter().zip(&sources) {
                let value = match source {
                    Some(idx) => {
                        let old = &row[*idx];
                        column.data_type.convert(old).ok_or_else(|| {
                            PlatformError::SchemaMigration(format!(
                                "Cannot convert {} value '{}' in {}.{} to {}",
                                old.type_name(),
                                old,
                                migrated.schema.name(),
                                column.name,
                                column.data_type
                            ))
                        })?
                    }
                    None if column.nullable => Value::Null,
                    None => column.data_type.default_value(),
                };
                if value.is_null() && !column.nullable {
                    return Err(PlatformError::SchemaMigration(format!(
                        "Column {}.{} cannot become NOT NULL: row {} holds NULL",
                        migrated.schema.name(),
                        column.name,
                        id
                    )));
                }
                new_row.push(value);
            }
            migrated.insert_at(*id, new_row).map_err(|e| match e {
                PlatformError::DuplicateKey { model, key } => PlatformError::SchemaMigration(
                    format!("Key change produces duplicate key {} in '{}'", key, model),
                ),
                other => PlatformError::SchemaMigration(other.to_string()),
            })?;
        }

        Ok(migrated)
    }

    fn key_of(&self, row: &Row) -> Option<Value> {
        self.schema
            .key_index()
            .map(|idx| row[idx].clone())
            .filter(|v| !v.is_null())
    }

    fn duplicate(&self, key: &Value) -> PlatformError {
        PlatformError::DuplicateKey {
            model: self.schema.name().to_string(),
            key: key.to_string(),
        }
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.columns();
        if row.len() != columns.len() {
            return Err(PlatformError::Storage(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }
}
