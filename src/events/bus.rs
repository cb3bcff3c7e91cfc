use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::{PlatformError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    SchemaRegenerated,
}

impl EventKind {
    /// Rule action suffix for entity events (`Order.Create`).
    pub fn rule_action(&self) -> Option<&'static str> {
        match self {
            Self::EntityCreated => Some("Create"),
            Self::EntityUpdated => Some("Update"),
            Self::EntityDeleted => Some("Delete"),
            Self::SchemaRegenerated => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Json>,
    /// Record after the write (before it, for deletes) or generation info.
    pub payload: Json,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn entity(kind: EventKind, model: impl Into<String>, key: Json, record: Json) -> Self {
        Self {
            kind,
            model: Some(model.into()),
            key: Some(key),
            payload: record,
            occurred_at: Utc::now(),
        }
    }

    pub fn schema_regenerated(version: u64, hash: &str) -> Self {
        Self {
            kind: EventKind::SchemaRegenerated,
            model: None,
            key: None,
            payload: serde_json::json!({ "version": version, "hash": hash }),
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> Result<()>;
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Event) -> HandlerFuture + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> HandlerFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        (self.func)(event.clone()).await
    }
}

/// In-process, synchronous pub/sub.
///
/// `publish` awaits every handler subscribed to the event's kind, in
/// subscription order. A failing handler does not stop the others; all
/// failures come back together as [`PlatformError::EventDelivery`].
/// Nothing is persisted or redelivered.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .await
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn publish(&self, event: &Event) -> Result<()> {
        // Snapshot so handlers may subscribe without deadlocking.
        let handlers = self
            .handlers
            .read()
            .await
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                log::warn!(
                    "Event handler '{}' failed on {:?}: {}",
                    handler.name(),
                    event.kind,
                    err
                );
                failures.push(format!("{}: {}", handler.name(), err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PlatformError::EventDelivery { failures })
        }
    }

    pub async fn publish_all(&self, events: &[Event]) -> Result<()> {
        let mut failures = Vec::new();
        for event in events {
            if let Err(PlatformError::EventDelivery { failures: f }) = self.publish(event).await {
                failures.extend(f);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PlatformError::EventDelivery { failures })
        }
    }
}
