use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use super::definition::WorkflowDefinition;
use crate::core::Result;
use crate::hashing::hash_serialized;
use crate::registry::HistoryLog;

pub const VERSIONS_FILE: &str = "workflows.jsonl";
pub const HISTORY_FILE: &str = "workflow_history.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowHistoryAction {
    Created,
    Updated,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHistoryEntry {
    pub workflow_name: String,
    pub version: u32,
    pub action: WorkflowHistoryAction,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Every saved version of every workflow, append-only.
///
/// Versions and audit entries each go to their own [`HistoryLog`]; the
/// in-memory index is rebuilt from the version log on open.
pub struct WorkflowStore {
    versions: HistoryLog<WorkflowDefinition>,
    history: HistoryLog<WorkflowHistoryEntry>,
    index: RwLock<HashMap<String, Vec<WorkflowDefinition>>>,
}

impl WorkflowStore {
    pub fn in_memory() -> Self {
        Self {
            versions: HistoryLog::in_memory(),
            history: HistoryLog::in_memory(),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let versions: HistoryLog<WorkflowDefinition> =
            HistoryLog::open(dir.join(VERSIONS_FILE)).await?;
        let history = HistoryLog::open(dir.join(HISTORY_FILE)).await?;

        let mut index: HashMap<String, Vec<WorkflowDefinition>> = HashMap::new();
        for definition in versions.entries().await {
            index
                .entry(definition.workflow_name.to_ascii_lowercase())
                .or_default()
                .push(definition);
        }
        for list in index.values_mut() {
            list.sort_by_key(|d| d.version);
        }

        Ok(Self {
            versions,
            history,
            index: RwLock::new(index),
        })
    }

    /// Stores `definition` as the next version of its name.
    ///
    /// `restored_from` marks a rollback to that earlier version.
    pub async fn append(
        &self,
        mut definition: WorkflowDefinition,
        restored_from: Option<u32>,
    ) -> Result<u32> {
        let mut index = self.index.write().await;
        let key = definition.workflow_name.to_ascii_lowercase();
        let version = index
            .get(&key)
            .and_then(|list| list.last())
            .map(|d| d.version + 1)
            .unwrap_or(1);
        definition.version = version;
        let action = match (restored_from, version) {
            (Some(_), _) => WorkflowHistoryAction::Rollback,
            (None, 1) => WorkflowHistoryAction::Created,
            (None, _) => WorkflowHistoryAction::Updated,
        };

        let entry = WorkflowHistoryEntry {
            workflow_name: definition.workflow_name.clone(),
            version,
            action,
            hash: hash_serialized(&definition)?,
            restored_from,
            timestamp: Utc::now(),
        };
        self.versions.append(definition.clone()).await?;
        self.history.append(entry).await?;
        index.entry(key).or_default().push(definition);
        Ok(version)
    }

    pub async fn latest(&self, name: &str) -> Option<WorkflowDefinition> {
        self.index
            .read()
            .await
            .get(&name.to_ascii_lowercase())
            .and_then(|list| list.last())
            .cloned()
    }

    pub async fn version(&self, name: &str, version: u32) -> Option<WorkflowDefinition> {
        self.index
            .read()
            .await
            .get(&name.to_ascii_lowercase())
            .and_then(|list| list.iter().find(|d| d.version == version))
            .cloned()
    }

    pub async fn versions(&self, name: &str) -> Vec<u32> {
        self.index
            .read()
            .await
            .get(&name.to_ascii_lowercase())
            .map(|list| list.iter().map(|d| d.version).collect())
            .unwrap_or_default()
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.index
            .read()
            .await
            .contains_key(&name.to_ascii_lowercase())
    }

    /// Latest version of every workflow, sorted by name.
    pub async fn all_latest(&self) -> Vec<WorkflowDefinition> {
        let mut latest: Vec<WorkflowDefinition> = self
            .index
            .read()
            .await
            .values()
            .filter_map(|list| list.last().cloned())
            .collect();
        latest.sort_by(|a, b| a.workflow_name.cmp(&b.workflow_name));
        latest
    }

    pub async fn history(&self, name: &str) -> Vec<WorkflowHistoryEntry> {
        self.history
            .filter(|e| e.workflow_name.eq_ignore_ascii_case(name))
            .await
    }
}
