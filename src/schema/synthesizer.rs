use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{Instrument, Level, event, info_span};

use super::compile::{CompiledSchema, compile};
use super::diff::SchemaDiff;
use super::generation::SchemaGeneration;
use super::validate::validate_declarations;
use crate::core::{PlatformError, Result};
use crate::events::{Event, EventBus};
use crate::registry::{ModelDeclaration, ModelRegistry};
use crate::storage::InMemoryStorage;

/// Turns declaration sets into live schema generations.
///
/// Regenerations are queued on a single writer lock. Migration and the swap
/// of the live generation happen under the write side of the hand-off lock;
/// data sessions hold its read side, so no reader ever pairs tables from one
/// generation with descriptors from another.
pub struct SchemaSynthesizer {
    registry: Arc<ModelRegistry>,
    storage: Arc<InMemoryStorage>,
    bus: Arc<EventBus>,
    live: RwLock<Arc<SchemaGeneration>>,
    handoff: Arc<RwLock<()>>,
    writer: Mutex<()>,
    allow_destructive: bool,
}

/// A generation pinned for the duration of one request.
pub struct PinnedGeneration {
    pub generation: Arc<SchemaGeneration>,
    pub guard: OwnedRwLockReadGuard<()>,
}

impl SchemaSynthesizer {
    pub fn new(
        registry: Arc<ModelRegistry>,
        storage: Arc<InMemoryStorage>,
        bus: Arc<EventBus>,
        allow_destructive: bool,
    ) -> Result<Self> {
        let empty = SchemaGeneration::empty(ModelRegistry::hash_of(&[])?);
        Ok(Self {
            registry,
            storage,
            bus,
            live: RwLock::new(Arc::new(empty)),
            handoff: Arc::new(RwLock::new(())),
            writer: Mutex::new(()),
            allow_destructive,
        })
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.storage
    }

    /// The live generation, without pinning it against a hand-off.
    pub async fn current(&self) -> Arc<SchemaGeneration> {
        self.live.read().await.clone()
    }

    /// Pins the live generation; waits while a hand-off is in progress.
    pub async fn pin(&self) -> PinnedGeneration {
        let guard = self.handoff.clone().read_owned().await;
        let generation = self.live.read().await.clone();
        PinnedGeneration { generation, guard }
    }

    /// Validates and compiles without touching storage or the live generation.
    pub fn check(declarations: &[ModelDeclaration]) -> Result<CompiledSchema> {
        validate_declarations(declarations)?;
        compile(declarations)
    }

    pub async fn regenerate(
        &self,
        declarations: Vec<ModelDeclaration>,
    ) -> Result<Arc<SchemaGeneration>> {
        let span = info_span!("schema.regenerate", models = declarations.len());
        let (generation, activated) = self.regenerate_inner(declarations).instrument(span).await?;
        if !activated {
            return Ok(generation);
        }

        let event = Event::schema_regenerated(generation.version(), generation.hash());
        if let Err(err) = self.bus.publish(&event).await {
            event!(Level::WARN, error = %err, "schema regeneration subscribers failed");
        }
        Ok(generation)
    }

    /// The resulting generation and whether it replaced the live one.
    async fn regenerate_inner(
        &self,
        declarations: Vec<ModelDeclaration>,
    ) -> Result<(Arc<SchemaGeneration>, bool)> {
        let _writer = self.writer.lock().await;

        if let Err(err) = validate_declarations(&declarations) {
            event!(Level::WARN, error = %err, "model declarations rejected");
            return Err(err);
        }
        let compiled = compile(&declarations)?;
        let hash = ModelRegistry::hash_of(&declarations)?;

        let current = self.current().await;
        if current.hash() == hash {
            event!(Level::INFO, version = current.version(), "declarations unchanged");
            self.registry.save(&declarations).await?;
            return Ok((current, false));
        }

        let diff = SchemaDiff::between(current.catalog(), &compiled.catalog);
        event!(
            Level::INFO,
            changes = diff.changes.len(),
            summary = %diff.summary(),
            "schema diff computed"
        );
        for change in diff.destructive_changes() {
            event!(Level::WARN, %change, "destructive schema change");
        }
        if diff.is_destructive() && !self.allow_destructive {
            let refused: Vec<String> = diff.destructive_changes().map(|c| c.to_string()).collect();
            return Err(PlatformError::SchemaMigration(format!(
                "destructive changes are disabled: {}",
                refused.join("; ")
            )));
        }

        let generation = Arc::new(SchemaGeneration::new(
            current.version() + 1,
            hash,
            declarations,
            compiled.descriptors,
            compiled.catalog,
        ));

        if let Err(err) = self.registry.save(generation.declarations()).await {
            event!(Level::ERROR, error = %err, "declarations could not be persisted");
            return Err(err);
        }

        {
            let _handoff = self.handoff.write().await;
            if !diff.is_empty() {
                match self.storage.apply_migration(generation.catalog()).await {
                    Ok(touched) => event!(Level::INFO, tables = touched, "migration applied"),
                    Err(err) => {
                        event!(Level::ERROR, error = %err, "migration failed");
                        if let Err(restore) = self.registry.save(current.declarations()).await {
                            event!(Level::ERROR, error = %restore, "previous declarations not restored");
                        }
                        return Err(err);
                    }
                }
            }
            *self.live.write().await = generation.clone();
        }
        event!(
            Level::INFO,
            version = generation.version(),
            hash = %generation.hash(),
            "schema generation activated"
        );

        Ok((generation, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HistoryLog, ModelStore, PropertyDecl, PropertyType};
    use async_trait::async_trait;

    struct ReadOnlyStore;

    #[async_trait]
    impl ModelStore for ReadOnlyStore {
        async fn load(&self) -> Result<Vec<ModelDeclaration>> {
            Ok(Vec::new())
        }

        async fn store(&self, _declarations: &[ModelDeclaration]) -> Result<()> {
            Err(PlatformError::Io("read-only file system".into()))
        }
    }

    fn synthesizer(allow_destructive: bool) -> SchemaSynthesizer {
        SchemaSynthesizer::new(
            Arc::new(ModelRegistry::in_memory()),
            Arc::new(InMemoryStorage::new()),
            Arc::new(EventBus::new()),
            allow_destructive,
        )
        .unwrap()
    }

    fn order(extra: Option<PropertyDecl>) -> ModelDeclaration {
        let mut decl = ModelDeclaration::new("Order")
            .with_property(PropertyDecl::new("OrderId", PropertyType::Int32).key());
        if let Some(prop) = extra {
            decl = decl.with_property(prop);
        }
        decl
    }

    #[tokio::test]
    async fn test_unchanged_declarations_keep_the_generation() {
        let synth = synthesizer(true);
        let first = synth.regenerate(vec![order(None)]).await.unwrap();
        let second = synth.regenerate(vec![order(None)]).await.unwrap();
        assert_eq!(first.version(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_destructive_diff_refused_when_disabled() {
        let synth = synthesizer(false);
        synth
            .regenerate(vec![order(Some(PropertyDecl::new("Note", PropertyType::String)))])
            .await
            .unwrap();

        let err = synth.regenerate(vec![order(None)]).await.unwrap_err();
        assert_eq!(err.reason(), "schema_migration");
        assert!(synth.current().await.descriptor("Order").unwrap().field("Note").is_some());
    }

    #[tokio::test]
    async fn test_pin_blocks_hand_off_until_released() {
        let synth = Arc::new(synthesizer(true));
        synth.regenerate(vec![order(None)]).await.unwrap();

        let pinned = synth.pin().await;
        let writer = {
            let synth = synth.clone();
            tokio::spawn(async move {
                synth
                    .regenerate(vec![order(Some(PropertyDecl::new("Total", PropertyType::Double)))])
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(synth.current().await.version(), 1);
        assert_eq!(pinned.generation.version(), 1);

        drop(pinned);
        let generation = writer.await.unwrap().unwrap();
        assert_eq!(generation.version(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_live_generation_untouched() {
        let registry = ModelRegistry::new(Arc::new(ReadOnlyStore), HistoryLog::in_memory());
        let storage = Arc::new(InMemoryStorage::new());
        let synth = SchemaSynthesizer::new(
            Arc::new(registry),
            storage.clone(),
            Arc::new(EventBus::new()),
            true,
        )
        .unwrap();

        let err = synth.regenerate(vec![order(None)]).await.unwrap_err();
        assert_eq!(err.reason(), "io_error");
        let live = synth.current().await;
        assert_eq!(live.version(), 0);
        assert!(live.descriptor("Order").is_err());
        assert!(storage.list_tables().await.is_empty());
    }
}
