// ============================================================================
// Undo Log Entries
// ============================================================================
//
// Writes go straight to the tables; each one leaves a Change behind that
// knows how to put the table back the way it was. Rolling back is replaying
// the log in reverse.
//
// ============================================================================

use crate::core::{Result, Row};
use crate::storage::InMemoryStorage;

#[derive(Debug, Clone)]
pub enum Change {
    InsertRow { table: String, row_id: usize },

    UpdateRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },

    DeleteRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    /// Reverts this change against the storage it was made on.
    pub async fn undo(&self, storage: &InMemoryStorage) -> Result<()> {
        match self {
            Change::InsertRow { table, row_id } => {
                storage.delete_row(table, *row_id).await?;
            }
            Change::UpdateRow {
                table,
                row_id,
                old_row,
            } => {
                storage.update_row(table, *row_id, old_row.clone()).await?;
            }
            Change::DeleteRow {
                table,
                row_id,
                old_row,
            } => {
                storage.restore_row(table, *row_id, old_row.clone()).await?;
            }
        }
        Ok(())
    }
}
