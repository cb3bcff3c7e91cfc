//! Append-only audit journals.
//!
//! A [`HistoryLog`] only ever grows: entries can be appended and read back,
//! there is no update or delete path. When a journal file is attached every
//! entry is also written as one JSON line before it becomes visible in memory.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::core::{PlatformError, Result};

pub struct HistoryLog<T> {
    entries: RwLock<Vec<T>>,
    journal: Option<PathBuf>,
}

impl<T> HistoryLog<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            journal: None,
        }
    }

    /// Opens a JSON-lines journal, replaying any entries already on disk.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry = serde_json::from_str(line).map_err(|err| {
                        PlatformError::Serialization(format!(
                            "Corrupt history entry at {}:{}: {}",
                            path.display(),
                            line_no + 1,
                            err
                        ))
                    })?;
                    entries.push(entry);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            entries: RwLock::new(entries),
            journal: Some(path),
        })
    }

    pub async fn append(&self, entry: T) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(path) = &self.journal {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        entries.push(entry);
        Ok(())
    }

    pub async fn entries(&self) -> Vec<T> {
        self.entries.read().await.clone()
    }

    pub async fn last(&self) -> Option<T> {
        self.entries.read().await.last().cloned()
    }

    pub async fn filter<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelHistoryAction {
    Created,
    Updated,
    Snapshot,
}

/// Model name used by snapshot entries covering the whole declaration set.
pub const SNAPSHOT_MODEL_NAME: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHistoryEntry {
    pub model_name: String,
    pub action: ModelHistoryAction,
    /// Serialized declaration (or the full set for snapshots).
    pub declaration: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}
