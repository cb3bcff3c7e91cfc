use super::{Catalog, Table};
use crate::core::{PlatformError, Result, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type TableHandle = Arc<RwLock<Table>>;

/// Physical tables of the live generation.
///
/// Each table has its own lock so CRUD on different models never contends.
/// The map itself is only replaced wholesale by [`InMemoryStorage::apply_migration`].
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, TableHandle>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_table(&self, name: &str) -> Result<TableHandle> {
        self.tables
            .read()
            .await
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| PlatformError::Storage(format!("Table '{}' not found", name)))
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.tables
            .read()
            .await
            .contains_key(&name.to_ascii_lowercase())
    }

    pub async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Brings the physical tables in line with `target`, all or nothing.
    ///
    /// Every table whose layout changes is rebuilt on a copy first; the new
    /// table map is swapped in only once all rebuilds succeeded. Returns the
    /// number of tables created, rebuilt or dropped.
    pub async fn apply_migration(&self, target: &Catalog) -> Result<usize> {
        let current = self.tables.read().await.clone();
        let mut next: HashMap<String, TableHandle> = HashMap::with_capacity(target.len());
        let mut touched = 0;

        for schema in target.tables() {
            let key = schema.key();
            let handle = match current.get(&key) {
                Some(handle) => {
                    let table = handle.read().await;
                    if table.schema() == schema {
                        handle.clone()
                    } else {
                        touched += 1;
                        Arc::new(RwLock::new(table.migrate(schema.clone())?))
                    }
                }
                None => {
                    touched += 1;
                    Arc::new(RwLock::new(Table::new(schema.clone())))
                }
            };
            next.insert(key, handle);
        }
        touched += current.keys().filter(|k| !next.contains_key(*k)).count();

        *self.tables.write().await = next;
        Ok(touched)
    }

    pub async fn scan(&self, table: &str) -> Result<Vec<Row>> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.scan())
    }

    pub async fn find_by_key(&self, table: &str, key: &Value) -> Result<Option<(usize, Row)>> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.find_by_key(key).map(|(id, row)| (id, row.clone())))
    }

    /// Builds and inserts a row under one write lock, so key generation
    /// inside `build` cannot race another insert.
    pub async fn insert_with<F>(&self, table: &str, build: F) -> Result<(usize, Row)>
    where
        F: FnOnce(&Table) -> Result<Row>,
    {
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        let row = build(&table)?;
        let id = table.insert(row.clone())?;
        Ok((id, row))
    }

    pub async fn insert_row(&self, table: &str, row: Row) -> Result<usize> {
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        table.insert(row)
    }

    pub async fn update_row(&self, table: &str, id: usize, row: Row) -> Result<Row> {
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        table.update(id, row)
    }

    pub async fn delete_row(&self, table: &str, id: usize) -> Result<Option<Row>> {
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        Ok(table.delete(id))
    }

    pub async fn restore_row(&self, table: &str, id: usize, row: Row) -> Result<()> {
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        table.restore(id, row)
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.row_count())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
