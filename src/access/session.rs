use serde_json::{Value as Json, json};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::{DataType, PlatformError, Result, Value};
use crate::events::{Event, EventBus, EventKind};
use crate::expression::{Expr, evaluate_bool};
use crate::rules::RuleEngine;
use crate::schema::{Descriptor, PinnedGeneration, Record, SchemaGeneration};
use crate::storage::InMemoryStorage;
use crate::transaction::{Change, Savepoint, UnitOfWork};

/// Position a session can roll back to: undo log plus pending events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSavepoint {
    unit: Savepoint,
    events: usize,
}

/// Generic CRUD bound to one pinned schema generation.
///
/// Writes apply immediately and are recorded in the session's unit of work.
/// Lifecycle events are held back until [`DataSession::finish`], which
/// releases the generation pin before publishing, so event handlers may
/// open sessions of their own.
pub struct DataSession {
    pin: PinnedGeneration,
    storage: Arc<InMemoryStorage>,
    rules: Arc<RuleEngine>,
    bus: Arc<EventBus>,
    unit: Mutex<UnitOfWork>,
    events: Mutex<Vec<Event>>,
}

impl DataSession {
    pub(crate) fn new(
        pin: PinnedGeneration,
        storage: Arc<InMemoryStorage>,
        rules: Arc<RuleEngine>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            pin,
            storage,
            rules,
            bus,
            unit: Mutex::new(UnitOfWork::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn generation(&self) -> &Arc<SchemaGeneration> {
        &self.pin.generation
    }

    pub fn descriptor(&self, model: &str) -> Result<Arc<Descriptor>> {
        self.pin.generation.descriptor(model)
    }

    pub async fn get_all(&self, model: &str) -> Result<Vec<Record>> {
        let descriptor = self.descriptor(model)?;
        let rows = self.storage.scan(&descriptor.model_name).await?;
        Ok(rows.iter().map(|row| descriptor.to_record(row)).collect())
    }

    /// `Ok(None)` when no record has that key.
    pub async fn get_by_id(&self, model: &str, key: &Json) -> Result<Option<Record>> {
        let descriptor = self.descriptor(model)?;
        let key = descriptor.coerce_key(key)?;
        Ok(self
            .storage
            .find_by_key(&descriptor.model_name, &key)
            .await?
            .map(|(_, row)| descriptor.to_record(&row)))
    }

    /// Records matching `filter`, in storage order, at most `limit` of them.
    pub async fn query(
        &self,
        model: &str,
        filter: Option<&Expr>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let records = self.get_all(model).await?;
        let mut matched = Vec::new();
        for record in records {
            if limit.is_some_and(|max| matched.len() >= max) {
                break;
            }
            let keep = match filter {
                Some(expr) => evaluate_bool(expr, &Json::Object(record.clone()))?,
                None => true,
            };
            if keep {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    /// Inserts a record, generating integer (max + 1) and guid keys when absent.
    pub async fn add(&self, model: &str, record: Record) -> Result<Record> {
        let descriptor = self.descriptor(model)?;
        let rule = format!("{}.Create", descriptor.model_name);
        self.rules.validate(&rule, &Json::Object(record.clone())).await?;

        let key_field = descriptor.key_field().clone();
        let supplied_key = descriptor.key_in(&record).is_some();
        let (row_id, row) = self
            .storage
            .insert_with(&descriptor.model_name, |table| {
                let mut record = record;
                if !supplied_key {
                    if let Some((_, max)) = key_field.property_type.integer_range() {
                        let next = table.max_integer_key().unwrap_or(0).saturating_add(1);
                        if next > max {
                            return Err(PlatformError::InvalidKey {
                                model: descriptor.model_name.clone(),
                                message: format!(
                                    "key space of '{}' ({}) is exhausted",
                                    key_field.name, key_field.property_type
                                ),
                            });
                        }
                        record.insert(key_field.name.clone(), json!(next));
                    } else if key_field.data_type == DataType::Guid {
                        record.insert(key_field.name.clone(), json!(Uuid::new_v4().to_string()));
                    }
                }
                descriptor.to_row(&record, None)
            })
            .await?;

        self.unit.lock().await.record(Change::InsertRow {
            table: descriptor.model_name.clone(),
            row_id,
        })?;

        let stored = descriptor.to_record(&row);
        self.push_event(EventKind::EntityCreated, &descriptor, &row[descriptor.key_index], &stored)
            .await;
        Ok(stored)
    }

    /// Merges the supplied fields over the stored record with the same key.
    pub async fn update(&self, model: &str, record: Record) -> Result<Record> {
        let descriptor = self.descriptor(model)?;
        let raw_key = descriptor.key_in(&record).ok_or_else(|| PlatformError::InvalidKey {
            model: descriptor.model_name.clone(),
            message: format!("key '{}' is required for update", descriptor.key_field().name),
        })?;
        let key = descriptor.coerce_key(raw_key)?;

        let (row_id, old_row) = self
            .storage
            .find_by_key(&descriptor.model_name, &key)
            .await?
            .ok_or_else(|| not_found(&descriptor, &key))?;
        let new_row = descriptor.to_row(&record, Some(&old_row))?;
        let merged = descriptor.to_record(&new_row);

        let rule = format!("{}.Update", descriptor.model_name);
        self.rules.validate(&rule, &Json::Object(merged.clone())).await?;

        let old_row = self
            .storage
            .update_row(&descriptor.model_name, row_id, new_row)
            .await?;
        self.unit.lock().await.record(Change::UpdateRow {
            table: descriptor.model_name.clone(),
            row_id,
            old_row,
        })?;

        self.push_event(EventKind::EntityUpdated, &descriptor, &key, &merged)
            .await;
        Ok(merged)
    }

    /// `Ok(false)` when nothing had that key.
    pub async fn delete(&self, model: &str, key: &Json) -> Result<bool> {
        let descriptor = self.descriptor(model)?;
        let key = descriptor.coerce_key(key)?;
        let Some((row_id, row)) = self.storage.find_by_key(&descriptor.model_name, &key).await?
        else {
            return Ok(false);
        };
        let existing = descriptor.to_record(&row);

        let rule = format!("{}.Delete", descriptor.model_name);
        self.rules.validate(&rule, &Json::Object(existing.clone())).await?;

        let Some(old_row) = self.storage.delete_row(&descriptor.model_name, row_id).await? else {
            return Ok(false);
        };
        self.unit.lock().await.record(Change::DeleteRow {
            table: descriptor.model_name.clone(),
            row_id,
            old_row,
        })?;

        self.push_event(EventKind::EntityDeleted, &descriptor, &key, &existing)
            .await;
        Ok(true)
    }

    pub async fn savepoint(&self) -> SessionSavepoint {
        SessionSavepoint {
            unit: self.unit.lock().await.savepoint(),
            events: self.events.lock().await.len(),
        }
    }

    /// Undoes writes made after `savepoint` and drops their pending events.
    pub async fn rollback_to(&self, savepoint: SessionSavepoint) -> Result<usize> {
        let undone = self
            .unit
            .lock()
            .await
            .rollback_to(savepoint.unit, &self.storage)
            .await?;
        self.events.lock().await.truncate(savepoint.events);
        Ok(undone)
    }

    pub async fn pending_events(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Commits, releases the generation pin, then publishes buffered events.
    ///
    /// Handler failures are logged; the writes stay committed.
    pub async fn finish(self) -> Result<usize> {
        let committed = self.unit.into_inner().commit()?;
        let events = self.events.into_inner();
        drop(self.pin);

        if !events.is_empty()
            && let Err(err) = self.bus.publish_all(&events).await
        {
            log::warn!("Lifecycle events published with failures: {}", err);
        }
        Ok(committed)
    }

    /// Undoes every write of the session; nothing is published.
    pub async fn rollback(self) -> Result<usize> {
        let undone = self.unit.into_inner().rollback(&self.storage).await?;
        log::debug!("Session rolled back {} change(s)", undone);
        Ok(undone)
    }

    async fn push_event(&self, kind: EventKind, descriptor: &Descriptor, key: &Value, record: &Record) {
        let event = Event::entity(
            kind,
            descriptor.model_name.clone(),
            key.to_json(),
            Json::Object(record.clone()),
        );
        self.events.lock().await.push(event);
    }
}

fn not_found(descriptor: &Descriptor, key: &Value) -> PlatformError {
    PlatformError::EntityNotFound {
        model: descriptor.model_name.clone(),
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::DataAccess;
    use crate::registry::{ModelDeclaration, ModelRegistry, PropertyDecl, PropertyType};
    use crate::schema::SchemaSynthesizer;

    async fn access() -> DataAccess {
        let bus = Arc::new(EventBus::new());
        let synthesizer = Arc::new(
            SchemaSynthesizer::new(
                Arc::new(ModelRegistry::in_memory()),
                Arc::new(InMemoryStorage::new()),
                bus.clone(),
                true,
            )
            .unwrap(),
        );
        synthesizer
            .regenerate(vec![
                ModelDeclaration::new("Note")
                    .with_property(PropertyDecl::new("NoteId", PropertyType::Int64).key())
                    .with_property(PropertyDecl::new("Text", PropertyType::String).required()),
            ])
            .await
            .unwrap();
        DataAccess::new(synthesizer, Arc::new(RuleEngine::new()), bus)
    }

    fn note(text: &str) -> Record {
        json!({ "Text": text }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_drops_later_writes_and_events() {
        let access = access().await;
        let session = access.session().await;
        session.add("Note", note("kept")).await.unwrap();
        let savepoint = session.savepoint().await;
        session.add("Note", note("dropped")).await.unwrap();
        session.delete("Note", &json!(1)).await.unwrap();
        assert_eq!(session.pending_events().await, 3);

        assert_eq!(session.rollback_to(savepoint).await.unwrap(), 2);
        assert_eq!(session.pending_events().await, 1);
        let texts: Vec<Json> = session
            .get_all("Note")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["Text"].clone())
            .collect();
        assert_eq!(texts, vec![json!("kept")]);
        assert_eq!(session.finish().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_undoes_the_whole_session() {
        let access = access().await;
        let session = access.session().await;
        session.add("Note", note("a")).await.unwrap();
        session
            .update("Note", json!({ "NoteId": 1, "Text": "b" }).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(session.rollback().await.unwrap(), 2);
        assert!(access.get_all("Note").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_applies_filter_before_limit() {
        let access = access().await;
        for text in ["alpha", "beta", "alphabet"] {
            access.add("Note", note(text)).await.unwrap();
        }
        let session = access.session().await;
        let filter = crate::expression::parse_expression("Text LIKE 'alpha%'").unwrap();
        let found = session.query("Note", Some(&filter), Some(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["NoteId"], json!(1));
        session.finish().await.unwrap();
    }
}
