use serde::Serialize;
use std::fmt;

use crate::core::Column;
use crate::storage::{Catalog, TableSchema};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "camelCase")]
pub enum SchemaChange {
    CreateTable { table: TableSchema },
    DropTable { table: String },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: String },
    AlterColumn { table: String, from: Column, to: Column },
    /// Same columns, different order; the table is rebuilt in place.
    ReorderColumns { table: String },
}

impl SchemaChange {
    pub fn table_name(&self) -> &str {
        match self {
            Self::CreateTable { table } => table.name(),
            Self::DropTable { table }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::ReorderColumns { table } => table,
        }
    }

    /// Drops and type changes can lose data.
    pub fn is_destructive(&self) -> bool {
        match self {
            Self::DropTable { .. } | Self::DropColumn { .. } => true,
            Self::AlterColumn { from, to, .. } => from.data_type != to.data_type,
            _ => false,
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table } => write!(f, "create table {}", table.name()),
            Self::DropTable { table } => write!(f, "drop table {}", table),
            Self::AddColumn { table, column } => {
                write!(f, "add column {}.{} {}", table, column.name, column.data_type)
            }
            Self::DropColumn { table, column } => write!(f, "drop column {}.{}", table, column),
            Self::AlterColumn { table, from, to } => write!(
                f,
                "alter column {}.{} {}{} -> {}{}",
                table,
                to.name,
                from.data_type,
                if from.nullable { "" } else { " NOT NULL" },
                to.data_type,
                if to.nullable { "" } else { " NOT NULL" }
            ),
            Self::ReorderColumns { table } => write!(f, "reorder columns of {}", table),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaDiff {
    pub changes: Vec<SchemaChange>,
}

impl SchemaDiff {
    /// Changes needed to turn `current` into `target`.
    pub fn between(current: &Catalog, target: &Catalog) -> Self {
        let mut changes = Vec::new();

        let mut target_tables: Vec<&TableSchema> = target.tables().collect();
        target_tables.sort_by_key(|t| t.key());
        for table in target_tables {
            match current.get_table(table.name()) {
                None => changes.push(SchemaChange::CreateTable {
                    table: table.clone(),
                }),
                Some(existing) => diff_table(existing, table, &mut changes),
            }
        }

        let mut dropped: Vec<&TableSchema> = current
            .tables()
            .filter(|t| !target.table_exists(t.name()))
            .collect();
        dropped.sort_by_key(|t| t.key());
        for table in dropped {
            changes.push(SchemaChange::DropTable {
                table: table.name().to_string(),
            });
        }

        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_destructive(&self) -> bool {
        self.changes.iter().any(SchemaChange::is_destructive)
    }

    pub fn destructive_changes(&self) -> impl Iterator<Item = &SchemaChange> {
        self.changes.iter().filter(|c| c.is_destructive())
    }

    pub fn summary(&self) -> String {
        if self.changes.is_empty() {
            return "no changes".to_string();
        }
        self.changes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn diff_table(existing: &TableSchema, target: &TableSchema, changes: &mut Vec<SchemaChange>) {
    let table = target.name().to_string();

    for column in target.columns() {
        match existing.column(&column.name) {
            None => changes.push(SchemaChange::AddColumn {
                table: table.clone(),
                column: column.clone(),
            }),
            Some(old) if !old.same_shape(column) || old.name != column.name => {
                changes.push(SchemaChange::AlterColumn {
                    table: table.clone(),
                    from: old.clone(),
                    to: column.clone(),
                })
            }
            Some(_) => {}
        }
    }

    for column in existing.columns() {
        if target.column(&column.name).is_none() {
            changes.push(SchemaChange::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
    }

    let shared_order = |schema: &TableSchema, other: &TableSchema| -> Vec<String> {
        schema
            .columns()
            .iter()
            .filter(|c| other.column(&c.name).is_some())
            .map(|c| c.name.to_ascii_lowercase())
            .collect()
    };
    if shared_order(existing, target) != shared_order(target, existing) {
        changes.push(SchemaChange::ReorderColumns { table });
    }
}
