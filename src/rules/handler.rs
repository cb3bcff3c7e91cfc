use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::{Arc, Weak};

use super::engine::{RuleEngine, RuleKind};
use crate::core::{PlatformError, Result};
use crate::events::{Event, EventHandler};

/// Something that can start a named workflow with a given input.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(&self, workflow: &str, input: Json) -> Result<()>;
}

/// Runs side-effect rules after committed entity mutations.
///
/// The trigger is held weakly: the orchestrator owns the data access layer
/// that publishes into the bus this handler is subscribed to.
pub struct RuleEventHandler {
    rules: Arc<RuleEngine>,
    trigger: Weak<dyn WorkflowTrigger>,
}

impl RuleEventHandler {
    pub fn new(rules: Arc<RuleEngine>, trigger: Weak<dyn WorkflowTrigger>) -> Self {
        Self { rules, trigger }
    }
}

#[async_trait]
impl EventHandler for RuleEventHandler {
    fn name(&self) -> &str {
        "side-effect-rules"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let (Some(model), Some(action)) = (&event.model, event.kind.rule_action()) else {
            return Ok(());
        };
        let name = format!("{}.{}", model, action);
        if !self.rules.has_workflow(&name).await {
            return Ok(());
        }

        let mut failures = Vec::new();
        let results = self
            .rules
            .execute_kind(&name, RuleKind::SideEffect, &event.payload)
            .await;
        for result in results {
            if !result.success {
                if let Some(message) = result.message {
                    failures.push(message);
                }
                continue;
            }
            let Some(workflow) = result.trigger_workflow else {
                log::debug!("Rule '{}' matched with nothing to trigger", result.rule_name);
                continue;
            };
            let Some(trigger) = self.trigger.upgrade() else {
                failures.push(format!("workflow runner for '{}' is gone", workflow));
                continue;
            };
            log::info!("Rule '{}' triggers workflow '{}'", result.rule_name, workflow);
            if let Err(err) = trigger.trigger(&workflow, event.payload.clone()).await {
                log::warn!(
                    "Workflow '{}' triggered by rule '{}' failed: {}",
                    workflow,
                    result.rule_name,
                    err
                );
                failures.push(format!("{}: {}", workflow, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PlatformError::RuleFailure {
                rule: name,
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::rules::{Rule, RuleWorkflow};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Json)>>,
    }

    #[async_trait]
    impl WorkflowTrigger for Recorder {
        async fn trigger(&self, workflow: &str, input: Json) -> Result<()> {
            self.calls.lock().unwrap().push((workflow.to_string(), input));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_matching_side_effect_triggers_workflow() {
        let rules = Arc::new(RuleEngine::new());
        rules
            .register(
                RuleWorkflow::new("Order.Create")
                    .with_rule(Rule::side_effect("Big", "Total > 100", "Escalate"))
                    .with_rule(Rule::validation("Positive", "Total > 0")),
            )
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let trigger: Arc<dyn WorkflowTrigger> = recorder.clone();
        let handler = RuleEventHandler::new(rules, Arc::downgrade(&trigger));

        let big = Event::entity(EventKind::EntityCreated, "Order", json!(1), json!({ "Total": 500 }));
        handler.handle(&big).await.unwrap();
        let small = Event::entity(EventKind::EntityCreated, "Order", json!(2), json!({ "Total": 5 }));
        handler.handle(&small).await.unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Escalate");
        assert_eq!(calls[0].1["Total"], 500);
    }
}
