use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::{PlatformError, Result};
use crate::expression::{Expr, evaluate_bool, parse_expression};

/// Whether a rule guards a mutation or reacts to one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    /// Runs before the write; a false result blocks it.
    #[default]
    Validation,
    /// Runs after the committed write; a true result fires its workflow.
    SideEffect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub rule_name: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub kind: RuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_workflow: Option<String>,
}

impl Rule {
    pub fn validation(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            rule_name: name.into(),
            expression: expression.into(),
            error_message: None,
            kind: RuleKind::Validation,
            trigger_workflow: None,
        }
    }

    pub fn side_effect(
        name: impl Into<String>,
        expression: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: name.into(),
            expression: expression.into(),
            error_message: None,
            kind: RuleKind::SideEffect,
            trigger_workflow: Some(workflow.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Named set of rules, e.g. `Order.Create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleWorkflow {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Outcome of one rule.
///
/// For validation rules `success` means the check held. For side-effect
/// rules it means the rule matched and its workflow should fire. An
/// expression that fails to evaluate is always `success: false` with the
/// error as message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub rule_name: String,
    pub kind: RuleKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_workflow: Option<String>,
}

struct CompiledRule {
    rule: Rule,
    expr: Expr,
}

struct CompiledWorkflow {
    name: String,
    rules: Vec<CompiledRule>,
}

/// Rule workflows keyed by case-insensitive name.
#[derive(Default)]
pub struct RuleEngine {
    workflows: RwLock<HashMap<String, Arc<CompiledWorkflow>>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a rule workflow. Every expression must parse.
    pub async fn register(&self, workflow: RuleWorkflow) -> Result<()> {
        let mut rules = Vec::with_capacity(workflow.rules.len());
        for rule in workflow.rules {
            let expr = parse_expression(&rule.expression).map_err(|err| {
                PlatformError::Expression(format!(
                    "rule '{}' in '{}': {}",
                    rule.rule_name, workflow.name, err
                ))
            })?;
            rules.push(CompiledRule { rule, expr });
        }
        let compiled = CompiledWorkflow {
            name: workflow.name,
            rules,
        };
        self.workflows
            .write()
            .await
            .insert(compiled.name.to_ascii_lowercase(), Arc::new(compiled));
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> bool {
        self.workflows
            .write()
            .await
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }

    pub async fn has_workflow(&self, name: &str) -> bool {
        self.workflows
            .read()
            .await
            .contains_key(&name.to_ascii_lowercase())
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workflows
            .read()
            .await
            .values()
            .map(|w| w.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Evaluates every rule of `name` against `bindings`.
    ///
    /// An unknown workflow yields no results.
    pub async fn execute(&self, name: &str, bindings: &Json) -> Vec<RuleResult> {
        self.run(name, None, bindings).await
    }

    pub async fn execute_kind(&self, name: &str, kind: RuleKind, bindings: &Json) -> Vec<RuleResult> {
        self.run(name, Some(kind), bindings).await
    }

    /// Runs the validation rules of `name`; any failure rejects the operation.
    pub async fn validate(&self, name: &str, bindings: &Json) -> Result<()> {
        let failures: Vec<String> = self
            .execute_kind(name, RuleKind::Validation, bindings)
            .await
            .into_iter()
            .filter(|r| !r.success)
            .map(|r| r.message.unwrap_or(r.rule_name))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PlatformError::RuleFailure {
                rule: name.to_string(),
                failures,
            })
        }
    }

    async fn run(&self, name: &str, kind: Option<RuleKind>, bindings: &Json) -> Vec<RuleResult> {
        let Some(workflow) = self
            .workflows
            .read()
            .await
            .get(&name.to_ascii_lowercase())
            .cloned()
        else {
            return Vec::new();
        };

        workflow
            .rules
            .iter()
            .filter(|c| kind.is_none_or(|k| c.rule.kind == k))
            .map(|compiled| evaluate_rule(compiled, bindings))
            .collect()
    }
}

fn evaluate_rule(compiled: &CompiledRule, bindings: &Json) -> RuleResult {
    let rule = &compiled.rule;
    let (success, message) = match evaluate_bool(&compiled.expr, bindings) {
        Ok(true) => (true, None),
        Ok(false) => match rule.kind {
            RuleKind::Validation => (
                false,
                Some(
                    rule.error_message
                        .clone()
                        .unwrap_or_else(|| format!("rule '{}' failed", rule.rule_name)),
                ),
            ),
            RuleKind::SideEffect => (false, None),
        },
        Err(err) => (
            false,
            Some(format!("rule '{}' could not be evaluated: {}", rule.rule_name, err)),
        ),
    };
    RuleResult {
        rule_name: rule.rule_name.clone(),
        kind: rule.kind,
        success,
        message,
        trigger_workflow: rule.trigger_workflow.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn engine() -> RuleEngine {
        let engine = RuleEngine::new();
        engine
            .register(
                RuleWorkflow::new("Order.Create")
                    .with_rule(Rule::validation("PositiveTotal", "Total > 0").with_message("Total must be positive"))
                    .with_rule(Rule::validation("HasCustomer", "Customer IS NOT NULL"))
                    .with_rule(Rule::side_effect("BigOrder", "Total >= 1000", "Escalate")),
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let engine = engine().await;
        assert!(engine.has_workflow("order.create").await);
        assert!(!engine.has_workflow("Order.Update").await);
        assert!(engine.execute("Order.Update", &json!({})).await.is_empty());
    }

    #[tokio::test]
    async fn test_validate_collects_every_failure() {
        let engine = engine().await;
        let err = engine
            .validate("ORDER.CREATE", &json!({ "Total": -5 }))
            .await
            .unwrap_err();
        match err {
            PlatformError::RuleFailure { failures, .. } => {
                assert_eq!(failures, vec!["Total must be positive", "rule 'HasCustomer' failed"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        engine
            .validate("Order.Create", &json!({ "Total": 5, "Customer": "c1" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_side_effect_results_report_matches() {
        let engine = engine().await;
        let results = engine
            .execute_kind("Order.Create", RuleKind::SideEffect, &json!({ "Total": 1500 }))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].trigger_workflow.as_deref(), Some("Escalate"));
    }

    #[tokio::test]
    async fn test_unparsable_rule_is_rejected_at_registration() {
        let engine = RuleEngine::new();
        let err = engine
            .register(RuleWorkflow::new("Bad").with_rule(Rule::validation("x", "Total >")))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "expression_error");
        assert!(!engine.has_workflow("Bad").await);
    }
}
