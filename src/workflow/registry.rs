use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;

use super::definition::{Parameter, VariableType, WorkflowStep};
use super::orchestrator::WorkflowOrchestrator;
use crate::access::DataSession;
use crate::core::{PlatformError, Result};
use crate::registry::PropertyType;
use crate::schema::{Descriptor, SchemaGeneration};

pub const MODEL_PARAM: &str = "model";

/// Everything an executor sees while one step attempt runs.
pub struct StepContext<'a> {
    pub workflow: &'a str,
    pub step_index: usize,
    pub attempt: u32,
    /// Output of the previous step, or the run input for the first one.
    pub input: &'a Json,
    pub context: &'a Json,
    pub session: &'a DataSession,
    pub depth: usize,
    pub orchestrator: &'a WorkflowOrchestrator,
}

/// Step parameters after `{{…}}` substitution and typing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepParameters {
    values: Vec<(String, Json)>,
}

impl StepParameters {
    pub fn new(values: Vec<(String, Json)>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Json::as_str)
    }

    /// A non-null value for `key`.
    pub fn require(&self, key: &str) -> Result<&Json> {
        self.get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| PlatformError::TypeError(format!("parameter '{}' is required", key)))
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.require(key)?.as_str().ok_or_else(|| {
            PlatformError::TypeError(format!("parameter '{}' must be a string", key))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Json)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every parameter whose key is not in `reserved`.
    pub fn excluding<'a>(&'a self, reserved: &'a [&'a str]) -> impl Iterator<Item = (&'a str, &'a Json)> {
        self.iter()
            .filter(move |(k, _)| !reserved.iter().any(|r| r.eq_ignore_ascii_case(k)))
    }
}

/// Implementation behind one step `type` tag.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn step_type(&self) -> &str;

    fn required_parameters(&self) -> &[&'static str] {
        &[]
    }

    /// Model names the step touches, for save-time checks.
    fn referenced_models(&self, step: &WorkflowStep) -> Vec<String> {
        step.parameter(MODEL_PARAM)
            .filter(|p| !p.is_templated() && !p.value.trim().is_empty())
            .map(|p| vec![p.value.trim().to_string()])
            .unwrap_or_default()
    }

    /// Extra save-time checks beyond required parameters and models.
    fn validate_step(&self, _step: &WorkflowStep, _generation: &SchemaGeneration) -> Vec<String> {
        Vec::new()
    }

    /// A default step of this type, shaped for `model` when given.
    fn scaffold(&self, _model: Option<&Descriptor>) -> WorkflowStep {
        self.required_parameters()
            .iter()
            .fold(WorkflowStep::new(self.step_type()), |step, key| {
                step.with_parameter(Parameter::string(*key, ""))
            })
    }

    async fn execute(&self, ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json>;
}

/// Tag → executor lookup, built once at startup.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` under its tag, replacing any earlier one.
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) -> Option<Arc<dyn StepExecutor>> {
        self.executors
            .insert(executor.step_type().to_ascii_lowercase(), executor)
    }

    pub fn resolve(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors
            .get(&step_type.trim().to_ascii_lowercase())
            .cloned()
    }

    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .executors
            .values()
            .map(|e| e.step_type().to_string())
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// Parameter type used when scaffolding a mapping for a field.
pub fn variable_type_for(property_type: PropertyType) -> VariableType {
    match property_type {
        PropertyType::Boolean => VariableType::Bool,
        PropertyType::Decimal | PropertyType::Float | PropertyType::Double => VariableType::Double,
        PropertyType::ByteArray => VariableType::Json,
        ty if ty.is_integer() => VariableType::Int,
        _ => VariableType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl StepExecutor for Noop {
        fn step_type(&self) -> &str {
            "Noop"
        }

        fn required_parameters(&self) -> &[&'static str] {
            &["target"]
        }

        async fn execute(&self, ctx: &StepContext<'_>, _params: &StepParameters) -> Result<Json> {
            Ok(ctx.input.clone())
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.register(Arc::new(Noop)).is_none());
        assert!(registry.resolve("noop").is_some());
        assert!(registry.resolve("Missing").is_none());
        assert_eq!(registry.step_types(), vec!["Noop"]);
    }

    #[test]
    fn test_default_scaffold_lists_required_parameters() {
        let step = Noop.scaffold(None);
        assert_eq!(step.step_type, "Noop");
        assert_eq!(step.parameters, vec![Parameter::string("target", "")]);
    }

    #[test]
    fn test_parameters_lookup() {
        let params = StepParameters::new(vec![
            ("model".into(), json!("Order")),
            ("Total".into(), json!(5)),
            ("Note".into(), Json::Null),
        ]);
        assert_eq!(params.require_str("MODEL").unwrap(), "Order");
        assert!(params.require("Note").is_err());
        let mappings: Vec<&str> = params.excluding(&[MODEL_PARAM]).map(|(k, _)| k).collect();
        assert_eq!(mappings, vec!["Total", "Note"]);
    }
}
