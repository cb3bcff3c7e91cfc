use std::sync::{Arc, Weak};

use crate::access::DataAccess;
use crate::config::PlatformConfig;
use crate::core::Result;
use crate::events::{EventBus, EventKind};
use crate::notify::{EmailSender, LoggingEmailSender};
use crate::registry::{ModelDeclaration, ModelRegistry};
use crate::rules::{RuleEngine, RuleEventHandler, WorkflowTrigger};
use crate::schema::{SchemaGeneration, SchemaSynthesizer};
use crate::storage::InMemoryStorage;
use crate::workflow::{
    RunSettings, StepExecutor, WorkflowOrchestrator, WorkflowRevalidator, WorkflowStore,
    builtin_registry,
};

/// Every component wired together.
///
/// Building a platform loads the stored declaration set and activates it, so
/// a file-backed platform comes back with the schema it was shut down with.
pub struct Platform {
    config: PlatformConfig,
    registry: Arc<ModelRegistry>,
    bus: Arc<EventBus>,
    rules: Arc<RuleEngine>,
    synthesizer: Arc<SchemaSynthesizer>,
    data: DataAccess,
    orchestrator: Arc<WorkflowOrchestrator>,
}

pub struct PlatformBuilder {
    config: PlatformConfig,
    email: Arc<dyn EmailSender>,
    executors: Vec<Arc<dyn StepExecutor>>,
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self {
            config: PlatformConfig::default(),
            email: Arc::new(LoggingEmailSender),
            executors: Vec::new(),
        }
    }
}

impl PlatformBuilder {
    pub fn config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email = sender;
        self
    }

    /// Registers an additional step executor; a built-in with the same tag is replaced.
    pub fn executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub async fn build(self) -> Result<Platform> {
        let config = self.config;

        let (registry, store) = match &config.data_dir {
            Some(dir) => (
                ModelRegistry::open_dir(dir).await?,
                WorkflowStore::open_dir(dir).await?,
            ),
            None => (ModelRegistry::in_memory(), WorkflowStore::in_memory()),
        };
        let registry = Arc::new(registry);
        let storage = Arc::new(InMemoryStorage::new());
        let bus = Arc::new(EventBus::new());
        let rules = Arc::new(RuleEngine::new());
        let synthesizer = Arc::new(SchemaSynthesizer::new(
            registry.clone(),
            storage,
            bus.clone(),
            config.allow_destructive_migrations,
        )?);
        let data = DataAccess::new(synthesizer.clone(), rules.clone(), bus.clone());

        let mut executors = builtin_registry(self.email);
        for executor in self.executors {
            if executors.register(executor.clone()).is_some() {
                log::warn!("Step executor '{}' replaces a built-in", executor.step_type());
            }
        }
        let settings = RunSettings {
            retry_backoff: config.retry_backoff,
            max_retry_backoff: config.max_retry_backoff,
            max_depth: config.max_workflow_depth,
        };
        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            store,
            executors,
            data.clone(),
            settings,
        ));

        let trigger: Arc<dyn WorkflowTrigger> = orchestrator.clone();
        let trigger: Weak<dyn WorkflowTrigger> = Arc::downgrade(&trigger);
        let side_effects = Arc::new(RuleEventHandler::new(rules.clone(), trigger));
        for kind in [
            EventKind::EntityCreated,
            EventKind::EntityUpdated,
            EventKind::EntityDeleted,
        ] {
            bus.subscribe(kind, side_effects.clone()).await;
        }
        bus.subscribe(
            EventKind::SchemaRegenerated,
            Arc::new(WorkflowRevalidator::new(&orchestrator)),
        )
        .await;

        let platform = Platform {
            config,
            registry,
            bus,
            rules,
            synthesizer,
            data,
            orchestrator,
        };

        let stored = platform.registry.load().await?;
        if !stored.is_empty() {
            log::info!("Activating {} stored model declaration(s)", stored.len());
            platform.synthesizer.regenerate(stored).await?;
        }
        Ok(platform)
    }
}

impl Platform {
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    /// In-memory platform with default settings.
    pub async fn in_memory() -> Result<Self> {
        Self::builder().build().await
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    pub fn synthesizer(&self) -> &Arc<SchemaSynthesizer> {
        &self.synthesizer
    }

    pub fn data(&self) -> &DataAccess {
        &self.data
    }

    pub fn workflows(&self) -> &Arc<WorkflowOrchestrator> {
        &self.orchestrator
    }

    /// Replaces the declaration set and activates the resulting generation.
    pub async fn regenerate(&self, declarations: Vec<ModelDeclaration>) -> Result<Arc<SchemaGeneration>> {
        self.synthesizer.regenerate(declarations).await
    }

    pub async fn current_generation(&self) -> Arc<SchemaGeneration> {
        self.synthesizer.current().await
    }
}
