use super::Change;
use crate::core::{PlatformError, Result};
use crate::storage::InMemoryStorage;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitOfWorkId(pub u64);

impl UnitOfWorkId {
    pub fn new() -> Self {
        UnitOfWorkId(NEXT_UNIT_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for UnitOfWorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uow_{}", self.0)
    }
}

/// Active ──commit──> Committed, Active ──rollback──> RolledBack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Committed,
    RolledBack,
}

/// Position in the undo log that a partial rollback can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Savepoint(usize);

/// Undo log for one data session.
#[derive(Debug)]
pub struct UnitOfWork {
    id: UnitOfWorkId,
    state: UnitState,
    changes: Vec<Change>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self {
            id: UnitOfWorkId::new(),
            state: UnitState::Active,
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> UnitOfWorkId {
        self.id
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn record(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;
        self.changes.push(change);
        Ok(())
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.changes.len())
    }

    /// Undoes every change recorded after `savepoint`, newest first.
    pub async fn rollback_to(
        &mut self,
        savepoint: Savepoint,
        storage: &InMemoryStorage,
    ) -> Result<usize> {
        self.ensure_active()?;
        let mut undone = 0;
        while self.changes.len() > savepoint.0 {
            if let Some(change) = self.changes.pop() {
                change.undo(storage).await?;
                undone += 1;
            }
        }
        Ok(undone)
    }

    pub async fn rollback(&mut self, storage: &InMemoryStorage) -> Result<usize> {
        let undone = self.rollback_to(Savepoint(0), storage).await?;
        self.state = UnitState::RolledBack;
        Ok(undone)
    }

    /// Forgets the undo log; the writes are already in place.
    pub fn commit(&mut self) -> Result<usize> {
        self.ensure_active()?;
        self.state = UnitState::Committed;
        Ok(std::mem::take(&mut self.changes).len())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != UnitState::Active {
            return Err(PlatformError::Internal(format!(
                "Unit of work {} is no longer active ({:?})",
                self.id, self.state
            )));
        }
        Ok(())
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};
    use crate::storage::{Catalog, TableSchema};

    async fn storage() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        let catalog = Catalog::new()
            .with_table(TableSchema::new(
                "items",
                vec![Column::new("id", DataType::Integer).primary_key()],
            ))
            .unwrap();
        storage.apply_migration(&catalog).await.unwrap();
        storage
    }

    async fn insert(uow: &mut UnitOfWork, storage: &InMemoryStorage, key: i64) {
        let row_id = storage
            .insert_row("items", vec![Value::Integer(key)])
            .await
            .unwrap();
        uow.record(Change::InsertRow {
            table: "items".to_string(),
            row_id,
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_keeps_earlier_changes() {
        let storage = storage().await;
        let mut uow = UnitOfWork::new();
        insert(&mut uow, &storage, 1).await;
        let sp = uow.savepoint();
        insert(&mut uow, &storage, 2).await;
        insert(&mut uow, &storage, 3).await;

        assert_eq!(uow.rollback_to(sp, &storage).await.unwrap(), 2);
        assert_eq!(storage.row_count("items").await.unwrap(), 1);
        assert_eq!(uow.len(), 1);
    }

    #[tokio::test]
    async fn test_full_rollback_and_terminal_state() {
        let storage = storage().await;
        let mut uow = UnitOfWork::new();
        insert(&mut uow, &storage, 1).await;

        uow.rollback(&storage).await.unwrap();
        assert_eq!(storage.row_count("items").await.unwrap(), 0);
        assert_eq!(uow.state(), UnitState::RolledBack);
        assert!(uow.commit().is_err());
    }
}
