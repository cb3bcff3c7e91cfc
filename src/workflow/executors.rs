//! Built-in step executors.

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use std::sync::Arc;
use tracing::{Level, event};

use super::definition::{Parameter, WorkflowStep};
use super::registry::{
    ExecutorRegistry, MODEL_PARAM, StepContext, StepExecutor, StepParameters, variable_type_for,
};
use crate::core::{PlatformError, Result};
use crate::expression::parse_expression;
use crate::notify::EmailSender;
use crate::schema::{Descriptor, Record, SchemaGeneration};

/// Registry holding every built-in executor.
pub fn builtin_registry(email: Arc<dyn EmailSender>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(CreateEntityExecutor));
    registry.register(Arc::new(UpdateEntityExecutor));
    registry.register(Arc::new(QueryEntityExecutor));
    registry.register(Arc::new(SendEmailExecutor::new(email)));
    registry.register(Arc::new(LogEventExecutor));
    registry.register(Arc::new(SubWorkflowExecutor));
    registry
}

fn mapping_template(field: &str) -> String {
    format!("{{{{input.{}}}}}", field)
}

/// Mapping keys that are not fields of the referenced model.
fn unknown_mappings(
    step: &WorkflowStep,
    generation: &SchemaGeneration,
    reserved: &[&str],
) -> Vec<String> {
    let Some(model) = step
        .parameter(MODEL_PARAM)
        .filter(|p| !p.is_templated())
        .map(|p| p.value.trim())
    else {
        return Vec::new();
    };
    let Ok(descriptor) = generation.descriptor(model) else {
        return Vec::new();
    };
    step.parameters
        .iter()
        .filter(|p| !reserved.iter().any(|r| r.eq_ignore_ascii_case(&p.key)))
        .filter(|p| descriptor.field(&p.key).is_none())
        .map(|p| format!("'{}' is not a field of model '{}'", p.key, descriptor.model_name))
        .collect()
}

fn mapped_record<'a>(fields: impl Iterator<Item = (&'a str, &'a Json)>) -> Record {
    fields.map(|(k, v)| (k.to_string(), v.clone())).collect()
}

const CREATE_RESERVED: [&str; 1] = [MODEL_PARAM];

pub struct CreateEntityExecutor;

#[async_trait]
impl StepExecutor for CreateEntityExecutor {
    fn step_type(&self) -> &str {
        "CreateEntity"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &CREATE_RESERVED
    }

    fn validate_step(&self, step: &WorkflowStep, generation: &SchemaGeneration) -> Vec<String> {
        unknown_mappings(step, generation, &CREATE_RESERVED)
    }

    /// `model` plus one mapping per required non-key field, in declaration order.
    fn scaffold(&self, model: Option<&Descriptor>) -> WorkflowStep {
        let Some(descriptor) = model else {
            return WorkflowStep::new(self.step_type()).with_parameter(Parameter::string(MODEL_PARAM, ""));
        };
        descriptor.required_non_key_fields().fold(
            WorkflowStep::new(self.step_type())
                .with_parameter(Parameter::string(MODEL_PARAM, descriptor.model_name.clone())),
            |step, field| {
                step.with_parameter(Parameter::new(
                    field.name.clone(),
                    variable_type_for(field.property_type),
                    mapping_template(&field.name),
                ))
            },
        )
    }

    async fn execute(&self, ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json> {
        let model = params.require_str(MODEL_PARAM)?;
        let record = mapped_record(params.excluding(&CREATE_RESERVED));
        let stored = ctx.session.add(model, record).await?;
        Ok(Json::Object(stored))
    }
}

const UPDATE_RESERVED: [&str; 2] = [MODEL_PARAM, "key"];

pub struct UpdateEntityExecutor;

#[async_trait]
impl StepExecutor for UpdateEntityExecutor {
    fn step_type(&self) -> &str {
        "UpdateEntity"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &UPDATE_RESERVED
    }

    fn validate_step(&self, step: &WorkflowStep, generation: &SchemaGeneration) -> Vec<String> {
        unknown_mappings(step, generation, &UPDATE_RESERVED)
    }

    fn scaffold(&self, model: Option<&Descriptor>) -> WorkflowStep {
        let Some(descriptor) = model else {
            return WorkflowStep::new(self.step_type())
                .with_parameter(Parameter::string(MODEL_PARAM, ""))
                .with_parameter(Parameter::string("key", ""));
        };
        let key = descriptor.key_field();
        descriptor.required_non_key_fields().fold(
            WorkflowStep::new(self.step_type())
                .with_parameter(Parameter::string(MODEL_PARAM, descriptor.model_name.clone()))
                .with_parameter(Parameter::new(
                    "key",
                    variable_type_for(key.property_type),
                    mapping_template(&key.name),
                )),
            |step, field| {
                step.with_parameter(Parameter::new(
                    field.name.clone(),
                    variable_type_for(field.property_type),
                    mapping_template(&field.name),
                ))
            },
        )
    }

    async fn execute(&self, ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json> {
        let model = params.require_str(MODEL_PARAM)?;
        let key = params.require("key")?;
        let descriptor = ctx.session.descriptor(model)?;
        let mut record = mapped_record(params.excluding(&UPDATE_RESERVED));
        record.retain(|k, _| !k.eq_ignore_ascii_case(&descriptor.key_field().name));
        record.insert(descriptor.key_field().name.clone(), key.clone());
        let merged = ctx.session.update(model, record).await?;
        Ok(Json::Object(merged))
    }
}

pub struct QueryEntityExecutor;

#[async_trait]
impl StepExecutor for QueryEntityExecutor {
    fn step_type(&self) -> &str {
        "QueryEntity"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &[MODEL_PARAM]
    }

    fn validate_step(&self, step: &WorkflowStep, _generation: &SchemaGeneration) -> Vec<String> {
        step.parameter("filter")
            .filter(|p| !p.is_templated() && !p.value.trim().is_empty())
            .and_then(|p| parse_expression(&p.value).err())
            .map(|err| vec![format!("filter: {}", err)])
            .unwrap_or_default()
    }

    async fn execute(&self, ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json> {
        let model = params.require_str(MODEL_PARAM)?;
        let filter = params
            .get_str("filter")
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(parse_expression)
            .transpose()?;
        let limit = match params.get("limit") {
            None | Some(Json::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        PlatformError::TypeError(format!("limit {} is not a non-negative int", value))
                    })?,
            ),
        };
        let records = ctx.session.query(model, filter.as_ref(), limit).await?;
        Ok(Json::Array(records.into_iter().map(Json::Object).collect()))
    }
}

pub struct SendEmailExecutor {
    sender: Arc<dyn EmailSender>,
}

impl SendEmailExecutor {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl StepExecutor for SendEmailExecutor {
    fn step_type(&self) -> &str {
        "SendEmail"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["to", "subject"]
    }

    async fn execute(&self, _ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json> {
        let to = params.require_str("to")?;
        let subject = params.require_str("subject")?;
        let body = params.get_str("body").unwrap_or_default();
        self.sender.send(to, subject, body).await?;
        Ok(json!({ "to": to, "subject": subject, "sent": true }))
    }
}

/// Diagnostic step: logs a message and passes its input through unchanged.
pub struct LogEventExecutor;

#[async_trait]
impl StepExecutor for LogEventExecutor {
    fn step_type(&self) -> &str {
        "LogEvent"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["message"]
    }

    fn validate_step(&self, step: &WorkflowStep, _generation: &SchemaGeneration) -> Vec<String> {
        match step.parameter("level").filter(|p| !p.is_templated()) {
            Some(level) if !LOG_LEVELS.contains(&level.value.trim().to_ascii_lowercase().as_str()) => {
                vec![format!("unknown log level '{}'", level.value)]
            }
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json> {
        let message = match params.require("message")? {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        let level = params
            .get_str("level")
            .map(|l| l.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let workflow = ctx.workflow;
        let step = ctx.step_index;
        match level.as_str() {
            "trace" => event!(Level::TRACE, workflow, step, "{}", message),
            "debug" => event!(Level::DEBUG, workflow, step, "{}", message),
            "warn" | "warning" => event!(Level::WARN, workflow, step, "{}", message),
            "error" => event!(Level::ERROR, workflow, step, "{}", message),
            _ => event!(Level::INFO, workflow, step, "{}", message),
        }
        Ok(ctx.input.clone())
    }
}

const LOG_LEVELS: [&str; 7] = ["trace", "debug", "info", "information", "warn", "warning", "error"];

/// Runs another stored workflow inside the current session.
///
/// The child gets the `input` parameter when present, otherwise the running
/// input of this step. Its output becomes this step's output.
pub struct SubWorkflowExecutor;

#[async_trait]
impl StepExecutor for SubWorkflowExecutor {
    fn step_type(&self) -> &str {
        "SubWorkflow"
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["workflow"]
    }

    async fn execute(&self, ctx: &StepContext<'_>, params: &StepParameters) -> Result<Json> {
        let workflow = params.require_str("workflow")?;
        let input = match params.get("input") {
            Some(value) if !value.is_null() => value.clone(),
            _ => ctx.input.clone(),
        };
        let result = ctx
            .orchestrator
            .run_nested(workflow, input, ctx.context.clone(), ctx.session, ctx.depth + 1)
            .await?;
        Ok(result.output)
    }
}
