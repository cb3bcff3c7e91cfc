//! Model Registry: the persisted declaration set and its audit trail.
//!
//! The registry only checks that declarations parse. Semantic checks (unique
//! names, relationship targets) belong to the schema synthesizer, which calls
//! [`ModelRegistry::save`] once a regeneration has passed validation and
//! before it is activated.

pub mod declaration;
pub mod history;
pub mod store;

pub use declaration::{
    ModelDeclaration, PropertyDecl, PropertyType, RelationshipDecl, RelationshipType,
};
pub use history::{HistoryLog, ModelHistoryAction, ModelHistoryEntry, SNAPSHOT_MODEL_NAME};
pub use store::{FileModelStore, InMemoryModelStore, ModelStore};

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::Result;
use crate::hashing;

pub struct ModelRegistry {
    store: Arc<dyn ModelStore>,
    history: HistoryLog<ModelHistoryEntry>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ModelStore>, history: HistoryLog<ModelHistoryEntry>) -> Self {
        Self { store, history }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryModelStore::new()), HistoryLog::in_memory())
    }

    /// File-backed registry: `models.json` plus `model_history.jsonl` in `dir`.
    pub async fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let history = HistoryLog::open(dir.join("model_history.jsonl")).await?;
        Ok(Self::new(Arc::new(FileModelStore::in_dir(dir)), history))
    }

    pub async fn load(&self) -> Result<Vec<ModelDeclaration>> {
        self.store.load().await
    }

    /// Persists the set and audits what changed.
    ///
    /// Saving a set whose hash equals the last audited hash leaves no history.
    pub async fn save(&self, declarations: &[ModelDeclaration]) -> Result<()> {
        let previous = self.store.load().await?;
        self.store.store(declarations).await?;

        let new_hash = Self::hash_of(declarations)?;
        let last_audited = self
            .history
            .filter(|e| e.action == ModelHistoryAction::Snapshot)
            .await
            .pop()
            .map(|e| e.hash);
        if last_audited.as_deref() == Some(new_hash.as_str()) {
            return Ok(());
        }

        let previous_hashes: HashMap<String, String> = previous
            .iter()
            .map(|d| -> Result<(String, String)> {
                Ok((d.lookup_key(), hashing::hash_serialized(d)?))
            })
            .collect::<Result<_>>()?;

        let now = Utc::now();
        for declaration in declarations {
            let hash = hashing::hash_serialized(declaration)?;
            let action = match previous_hashes.get(&declaration.lookup_key()) {
                None => ModelHistoryAction::Created,
                Some(old) if *old != hash => ModelHistoryAction::Updated,
                Some(_) if last_audited.is_none() => ModelHistoryAction::Created,
                Some(_) => continue,
            };
            self.history
                .append(ModelHistoryEntry {
                    model_name: declaration.name.clone(),
                    action,
                    declaration: serde_json::to_string(declaration)?,
                    hash,
                    timestamp: now,
                })
                .await?;
        }

        self.history
            .append(ModelHistoryEntry {
                model_name: SNAPSHOT_MODEL_NAME.to_string(),
                action: ModelHistoryAction::Snapshot,
                declaration: serde_json::to_string(declarations)?,
                hash: new_hash,
                timestamp: now,
            })
            .await
    }

    /// Content hash of the persisted declarations.
    pub async fn hash(&self) -> Result<String> {
        let declarations = self.store.load().await?;
        Self::hash_of(&declarations)
    }

    /// Order-insensitive hash: models are sorted by lowercase name first.
    pub fn hash_of(declarations: &[ModelDeclaration]) -> Result<String> {
        let mut sorted: Vec<&ModelDeclaration> = declarations.iter().collect();
        sorted.sort_by_key(|d| d.lookup_key());
        hashing::hash_serialized(&sorted)
    }

    pub async fn history(&self) -> Vec<ModelHistoryEntry> {
        self.history.entries().await
    }

    pub async fn model_history(&self, model_name: &str) -> Vec<ModelHistoryEntry> {
        self.history
            .filter(|e| e.model_name.eq_ignore_ascii_case(model_name))
            .await
    }
}
