use async_recursion::async_recursion;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

use super::definition::{WorkflowDefinition, WorkflowStep, conform};
use super::policy::{ErrorPolicy, backoff};
use super::registry::{ExecutorRegistry, StepContext, StepParameters};
use super::scope::VariableScope;
use super::store::{WorkflowHistoryEntry, WorkflowStore};
use super::validation::validate_definition;
use crate::access::{DataAccess, DataSession};
use crate::core::{PlatformError, Result};
use crate::events::{Event, EventHandler, EventKind};
use crate::expression::{evaluate_bool, parse_expression, template};
use crate::rules::WorkflowTrigger;

/// Run-time knobs taken from the platform configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub max_depth: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::ZERO,
            max_retry_backoff: Duration::from_secs(5),
            max_depth: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub index: usize,
    pub step_type: String,
    pub status: StepStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub workflow_name: String,
    pub version: u32,
    /// Output of the last executed step (the input if none ran).
    pub output: Json,
    pub variables: Map<String, Json>,
    pub steps: Vec<StepReport>,
}

struct StepFailure {
    attempts: u32,
    message: String,
}

impl StepFailure {
    fn before_dispatch(err: impl std::fmt::Display) -> Self {
        Self {
            attempts: 0,
            message: err.to_string(),
        }
    }
}

enum StepOutcome {
    Skipped,
    Completed { output: Json, attempts: u32 },
}

/// Saves, versions and runs workflow definitions.
pub struct WorkflowOrchestrator {
    store: WorkflowStore,
    executors: ExecutorRegistry,
    data: DataAccess,
    settings: RunSettings,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: WorkflowStore,
        executors: ExecutorRegistry,
        data: DataAccess,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            executors,
            data,
            settings,
        }
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Validates `definition` against the live schema and stores it as a new version.
    pub async fn save_workflow(&self, definition: WorkflowDefinition) -> Result<u32> {
        let generation = self.data.current_generation().await;
        let violations = validate_definition(&definition, &self.executors, &generation);
        if !violations.is_empty() {
            event!(
                Level::WARN,
                workflow = %definition.workflow_name,
                violations = violations.len(),
                "workflow rejected"
            );
            return Err(PlatformError::WorkflowValidation {
                workflow: definition.workflow_name,
                violations,
            });
        }

        let name = definition.workflow_name.clone();
        let version = self.store.append(definition, None).await?;
        event!(Level::INFO, workflow = %name, version, "workflow saved");
        Ok(version)
    }

    /// Saves `definition` unless the latest stored version has the same content.
    ///
    /// Returns the current version and whether a new one was written.
    pub async fn seed_workflow(&self, definition: WorkflowDefinition) -> Result<(u32, bool)> {
        if let Some(latest) = self.store.latest(&definition.workflow_name).await
            && latest.same_content(&definition)
        {
            event!(
                Level::DEBUG,
                workflow = %latest.workflow_name,
                version = latest.version,
                "workflow unchanged"
            );
            return Ok((latest.version, false));
        }
        let version = self.save_workflow(definition).await?;
        Ok((version, true))
    }

    pub async fn get_workflow(&self, name: &str) -> Option<WorkflowDefinition> {
        self.store.latest(name).await
    }

    pub async fn get_workflow_version(&self, name: &str, version: u32) -> Option<WorkflowDefinition> {
        self.store.version(name, version).await
    }

    pub async fn list_versions(&self, name: &str) -> Vec<u32> {
        self.store.versions(name).await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.store.all_latest().await
    }

    pub async fn history(&self, name: &str) -> Vec<WorkflowHistoryEntry> {
        self.store.history(name).await
    }

    /// Re-saves version `to_version` verbatim as the newest version.
    ///
    /// `Ok(false)` when that version does not exist.
    pub async fn rollback_workflow(&self, name: &str, to_version: u32) -> Result<bool> {
        let Some(target) = self.store.version(name, to_version).await else {
            return Ok(false);
        };
        let version = self.store.append(target, Some(to_version)).await?;
        event!(
            Level::INFO,
            workflow = %name,
            restored = to_version,
            version,
            "workflow rolled back"
        );
        Ok(true)
    }

    /// A default step of `step_type`, shaped for `model` when given.
    pub async fn scaffold_step(&self, step_type: &str, model: Option<&str>) -> Result<WorkflowStep> {
        let executor = self.executors.resolve(step_type).ok_or_else(|| {
            PlatformError::WorkflowValidation {
                workflow: String::new(),
                violations: vec![format!("unknown step type '{}'", step_type)],
            }
        })?;
        let descriptor = match model {
            Some(model) => Some(self.data.current_generation().await.descriptor(model)?),
            None => None,
        };
        Ok(executor.scaffold(descriptor.as_deref()))
    }

    /// Stored workflows that no longer validate against the live schema.
    pub async fn revalidate_all(&self) -> Vec<(String, Vec<String>)> {
        let generation = self.data.current_generation().await;
        self.store
            .all_latest()
            .await
            .into_iter()
            .filter_map(|definition| {
                let violations = validate_definition(&definition, &self.executors, &generation);
                (!violations.is_empty()).then_some((definition.workflow_name, violations))
            })
            .collect()
    }

    /// Runs the latest version of `name` in a fresh data session.
    pub async fn run(&self, name: &str, input: Json, context: Json) -> Result<RunResult> {
        let definition = self
            .store
            .latest(name)
            .await
            .ok_or_else(|| PlatformError::WorkflowNotFound(name.to_string()))?;
        let session = self.data.session().await;
        let outcome = self
            .execute(&definition, input, context, &session, 0)
            .await;
        session.finish().await?;
        outcome
    }

    /// Runs `name` inside an existing session, as a sub-workflow.
    #[async_recursion]
    pub async fn run_nested(
        &self,
        name: &str,
        input: Json,
        context: Json,
        session: &DataSession,
        depth: usize,
    ) -> Result<RunResult> {
        if depth > self.settings.max_depth {
            return Err(PlatformError::WorkflowValidation {
                workflow: name.to_string(),
                violations: vec![format!(
                    "nesting depth {} exceeds the limit of {}",
                    depth, self.settings.max_depth
                )],
            });
        }
        let definition = self
            .store
            .latest(name)
            .await
            .ok_or_else(|| PlatformError::WorkflowNotFound(name.to_string()))?;
        self.execute(&definition, input, context, session, depth).await
    }

    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: Json,
        context: Json,
        session: &DataSession,
        depth: usize,
    ) -> Result<RunResult> {
        let span = info_span!(
            "workflow_run",
            workflow = %definition.workflow_name,
            version = definition.version,
            depth
        );
        self.execute_steps(definition, input, context, session, depth)
            .instrument(span)
            .await
    }

    async fn execute_steps(
        &self,
        definition: &WorkflowDefinition,
        input: Json,
        context: Json,
        session: &DataSession,
        depth: usize,
    ) -> Result<RunResult> {
        let start = session.savepoint().await;
        let mut scope = VariableScope::from_globals(&definition.global_variables)?;
        scope.merge_input(&input);
        let mut running = input.clone();
        let mut reports = Vec::with_capacity(definition.steps.len());
        event!(
            Level::INFO,
            steps = definition.steps.len(),
            transactional = definition.is_transactional,
            "workflow run started"
        );

        for (index, step) in definition.steps.iter().enumerate() {
            let eval_scope = scope.evaluation_scope(&running, &input, &context);
            let outcome = self
                .run_step(definition, index, step, &eval_scope, &running, &context, session, depth)
                .await;
            match outcome {
                Ok(StepOutcome::Skipped) => reports.push(StepReport {
                    index,
                    step_type: step.step_type.clone(),
                    status: StepStatus::Skipped,
                    attempts: 0,
                }),
                Ok(StepOutcome::Completed { output, attempts }) => {
                    if let Some(variable) = step.output_variable.as_deref().map(str::trim)
                        && !variable.is_empty()
                    {
                        scope.bind(variable, output.clone());
                    }
                    running = output;
                    reports.push(StepReport {
                        index,
                        step_type: step.step_type.clone(),
                        status: StepStatus::Completed,
                        attempts,
                    });
                }
                Err(failure) => {
                    let rolled_back = if definition.is_transactional {
                        let undone = session.rollback_to(start).await?;
                        event!(Level::WARN, undone, "transactional run rolled back");
                        true
                    } else {
                        false
                    };
                    event!(
                        Level::ERROR,
                        step = index,
                        step_type = %step.step_type,
                        attempts = failure.attempts,
                        error = %failure.message,
                        completed = reports.len(),
                        "workflow run failed"
                    );
                    return Err(PlatformError::StepExecution {
                        workflow: definition.workflow_name.clone(),
                        step_index: index,
                        step_type: step.step_type.clone(),
                        attempts: failure.attempts,
                        message: failure.message,
                        rolled_back,
                    });
                }
            }
        }

        event!(Level::INFO, steps = reports.len(), "workflow run completed");
        Ok(RunResult {
            workflow_name: definition.workflow_name.clone(),
            version: definition.version,
            output: running,
            variables: scope.into_variables(),
            steps: reports,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        definition: &WorkflowDefinition,
        index: usize,
        step: &WorkflowStep,
        eval_scope: &Json,
        running: &Json,
        context: &Json,
        session: &DataSession,
        depth: usize,
    ) -> std::result::Result<StepOutcome, StepFailure> {
        if let Some(condition) = step.condition() {
            let expr = parse_expression(condition).map_err(StepFailure::before_dispatch)?;
            if !evaluate_bool(&expr, eval_scope).map_err(StepFailure::before_dispatch)? {
                event!(Level::INFO, step = index, step_type = %step.step_type, "condition false, step skipped");
                return Ok(StepOutcome::Skipped);
            }
        }

        let executor = self.executors.resolve(&step.step_type).ok_or_else(|| {
            StepFailure::before_dispatch(format!("unknown step type '{}'", step.step_type))
        })?;
        let policy = ErrorPolicy::parse(step.on_error.as_deref()).map_err(StepFailure::before_dispatch)?;
        let params = resolve_parameters(step, eval_scope).map_err(StepFailure::before_dispatch)?;
        let max_attempts = policy.max_attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let savepoint = session.savepoint().await;
            let ctx = StepContext {
                workflow: &definition.workflow_name,
                step_index: index,
                attempt,
                input: running,
                context,
                session,
                depth,
                orchestrator: self,
            };
            let err = match executor.execute(&ctx, &params).await {
                Ok(output) => return Ok(StepOutcome::Completed { output, attempts: attempt }),
                Err(err) => err,
            };

            session.rollback_to(savepoint).await.map_err(|undo| StepFailure {
                attempts: attempt,
                message: format!("{} (undo failed: {})", err, undo),
            })?;
            if attempt >= max_attempts {
                return Err(StepFailure {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let delay = backoff(attempt, self.settings.retry_backoff, self.settings.max_retry_backoff);
            event!(
                Level::WARN,
                step = index,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "step attempt failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Substitutes `{{…}}` placeholders and types every parameter.
fn resolve_parameters(step: &WorkflowStep, scope: &Json) -> Result<StepParameters> {
    step.parameters
        .iter()
        .map(|parameter| {
            let value = if parameter.is_templated() {
                conform(
                    &parameter.key,
                    &parameter.declared_type,
                    template::render(&parameter.value, scope),
                )?
            } else {
                parameter.typed_value()?
            };
            Ok((parameter.key.clone(), value))
        })
        .collect::<Result<Vec<_>>>()
        .map(StepParameters::new)
}

#[async_trait]
impl WorkflowTrigger for WorkflowOrchestrator {
    async fn trigger(&self, workflow: &str, input: Json) -> Result<()> {
        self.run(workflow, input, Json::Null).await.map(|_| ())
    }
}

/// Re-checks stored workflows whenever the schema is regenerated.
pub struct WorkflowRevalidator {
    orchestrator: Weak<WorkflowOrchestrator>,
}

impl WorkflowRevalidator {
    pub fn new(orchestrator: &Arc<WorkflowOrchestrator>) -> Self {
        Self {
            orchestrator: Arc::downgrade(orchestrator),
        }
    }
}

#[async_trait]
impl EventHandler for WorkflowRevalidator {
    fn name(&self) -> &str {
        "workflow-revalidation"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if event.kind != EventKind::SchemaRegenerated {
            return Ok(());
        }
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            return Ok(());
        };
        for (workflow, violations) in orchestrator.revalidate_all().await {
            event!(
                Level::WARN,
                workflow = %workflow,
                problems = %violations.join("; "),
                "stored workflow no longer matches the schema"
            );
        }
        Ok(())
    }
}
