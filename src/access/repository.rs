use serde_json::Value as Json;
use std::future::Future;
use std::sync::Arc;

use super::session::DataSession;
use crate::core::{PlatformError, Result};
use crate::events::EventBus;
use crate::expression::Expr;
use crate::rules::RuleEngine;
use crate::schema::{Record, SchemaGeneration, SchemaSynthesizer};

/// CRUD by model name against the live generation.
///
/// Each call runs in its own [`DataSession`]; callers that need several
/// operations to share one generation and one undo log open a session
/// themselves.
#[derive(Clone)]
pub struct DataAccess {
    synthesizer: Arc<SchemaSynthesizer>,
    rules: Arc<RuleEngine>,
    bus: Arc<EventBus>,
}

impl DataAccess {
    pub fn new(
        synthesizer: Arc<SchemaSynthesizer>,
        rules: Arc<RuleEngine>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            synthesizer,
            rules,
            bus,
        }
    }

    /// Opens a session pinned to the live generation.
    pub async fn session(&self) -> DataSession {
        let pin = self.synthesizer.pin().await;
        DataSession::new(
            pin,
            self.synthesizer.storage().clone(),
            self.rules.clone(),
            self.bus.clone(),
        )
    }

    pub async fn current_generation(&self) -> Arc<SchemaGeneration> {
        self.synthesizer.current().await
    }

    pub async fn get_all(&self, model: &str) -> Result<Vec<Record>> {
        let session = self.session().await;
        let records = session.get_all(model).await;
        self.settle(session, records).await
    }

    pub async fn get_by_id(&self, model: &str, key: &Json) -> Result<Option<Record>> {
        let session = self.session().await;
        let record = session.get_by_id(model, key).await;
        self.settle(session, record).await
    }

    pub async fn query(
        &self,
        model: &str,
        filter: Option<&Expr>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let session = self.session().await;
        let records = session.query(model, filter, limit).await;
        self.settle(session, records).await
    }

    pub async fn add(&self, model: &str, record: Record) -> Result<Record> {
        let session = self.session().await;
        let stored = session.add(model, record).await;
        self.settle(session, stored).await
    }

    pub async fn update(&self, model: &str, record: Record) -> Result<Record> {
        let session = self.session().await;
        let merged = session.update(model, record).await;
        self.settle(session, merged).await
    }

    pub async fn delete(&self, model: &str, key: &Json) -> Result<bool> {
        let session = self.session().await;
        let deleted = session.delete(model, key).await;
        self.settle(session, deleted).await
    }

    /// Runs `work` in one session: committed on success, rolled back on error.
    pub async fn transaction<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<DataSession>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = Arc::new(self.session().await);
        let outcome = work(session.clone()).await;
        let session = Arc::into_inner(session).ok_or_else(|| {
            PlatformError::Internal(
                "session is still referenced after the transaction body returned".into(),
            )
        })?;
        self.settle(session, outcome).await
    }

    async fn settle<T>(&self, session: DataSession, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                session.finish().await?;
                Ok(value)
            }
            Err(err) => {
                session.rollback().await?;
                Err(err)
            }
        }
    }
}
