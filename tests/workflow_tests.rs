use async_trait::async_trait;
use schemaflow::workflow::{StepStatus, WorkflowHistoryAction};
use schemaflow::{
    ModelDeclaration, OutboxEmailSender, Parameter, Platform, PlatformConfig, PlatformError, PropertyDecl,
    PropertyType, StepContext, StepExecutor, StepParameters, VariableType, WorkflowDefinition,
    WorkflowStep,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Fails its first `failures` invocations, then succeeds.
struct Flaky {
    tag: &'static str,
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl Flaky {
    fn new(tag: &'static str, failures: u32) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = Arc::new(Self {
            tag,
            failures,
            calls: calls.clone(),
        });
        (executor, calls)
    }
}

#[async_trait]
impl StepExecutor for Flaky {
    fn step_type(&self) -> &str {
        self.tag
    }

    async fn execute(&self, ctx: &StepContext<'_>, _params: &StepParameters) -> schemaflow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(PlatformError::Internal(format!("flaky failure #{call}")));
        }
        Ok(json!({ "call": call, "attempt": ctx.attempt }))
    }
}

fn invoice() -> ModelDeclaration {
    ModelDeclaration::new("Invoice")
        .with_property(PropertyDecl::new("InvoiceId", PropertyType::Int32).key())
        .with_property(PropertyDecl::new("OrderId", PropertyType::Int32).required())
        .with_property(PropertyDecl::new("Total", PropertyType::Decimal).required())
}

async fn invoice_platform() -> Platform {
    let platform = Platform::in_memory().await.unwrap();
    platform.regenerate(vec![invoice()]).await.unwrap();
    platform
}

fn log_step(message: &str) -> WorkflowStep {
    WorkflowStep::new("LogEvent").with_parameter(Parameter::string("message", message))
}

#[tokio::test]
async fn versions_increase_by_one_and_rollback_round_trips() {
    let platform = invoice_platform().await;
    let workflows = platform.workflows();

    let v1 = WorkflowDefinition::new("Billing").with_step(log_step("first"));
    let v2 = WorkflowDefinition::new("Billing").with_step(log_step("second"));
    let v3 = WorkflowDefinition::new("billing").with_step(log_step("third"));

    assert_eq!(workflows.save_workflow(v1.clone()).await.unwrap(), 1);
    assert_eq!(workflows.save_workflow(v2).await.unwrap(), 2);
    assert_eq!(workflows.save_workflow(v3).await.unwrap(), 3);

    assert!(workflows.rollback_workflow("Billing", 1).await.unwrap());
    assert_eq!(workflows.list_versions("Billing").await, vec![1, 2, 3, 4]);

    let latest = workflows.get_workflow("BILLING").await.unwrap();
    assert_eq!(latest.version, 4);
    assert!(latest.same_content(&v1));

    let actions: Vec<_> = workflows
        .history("Billing")
        .await
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            WorkflowHistoryAction::Created,
            WorkflowHistoryAction::Updated,
            WorkflowHistoryAction::Updated,
            WorkflowHistoryAction::Rollback,
        ]
    );

    assert!(!workflows.rollback_workflow("Billing", 9).await.unwrap());
}

#[tokio::test]
async fn false_condition_never_dispatches_the_executor() {
    let (executor, calls) = Flaky::new("Probe", 0);
    let platform = Platform::builder().executor(executor).build().await.unwrap();
    let workflows = platform.workflows();

    workflows
        .save_workflow(
            WorkflowDefinition::new("Gate")
                .with_step(WorkflowStep::new("Probe").when("input.Amount > 100")),
        )
        .await
        .unwrap();

    let result = workflows.run("Gate", json!({ "Amount": 5 }), Value::Null).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.steps[0].status, StepStatus::Skipped);
    assert_eq!(result.output, json!({ "Amount": 5 }));

    workflows.run("Gate", json!({ "Amount": 500 }), Value::Null).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_policy_invokes_until_success() {
    let (executor, calls) = Flaky::new("Flaky", 2);
    let platform = Platform::builder().executor(executor).build().await.unwrap();
    let workflows = platform.workflows();
    workflows
        .save_workflow(
            WorkflowDefinition::new("Resilient")
                .with_step(WorkflowStep::new("Flaky").on_error("Retry:3").output("probe")),
        )
        .await
        .unwrap();

    let result = workflows.run("Resilient", json!({}), Value::Null).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.steps[0].attempts, 3);
    assert_eq!(result.variables["probe"], json!({ "call": 3, "attempt": 3 }));
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let (executor, calls) = Flaky::new("Flaky", 10);
    let platform = Platform::builder().executor(executor).build().await.unwrap();
    let workflows = platform.workflows();
    workflows
        .save_workflow(
            WorkflowDefinition::new("Doomed").with_step(WorkflowStep::new("Flaky").on_error("Retry:2")),
        )
        .await
        .unwrap();

    let err = workflows.run("Doomed", json!({}), Value::Null).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match err {
        PlatformError::StepExecution {
            step_index,
            attempts,
            message,
            ..
        } => {
            assert_eq!(step_index, 0);
            assert_eq!(attempts, 2);
            assert!(message.contains("flaky failure #2"));
        }
        other => panic!("expected step execution failure, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_definitions_are_never_persisted() {
    let platform = invoice_platform().await;
    let workflows = platform.workflows();

    let cases = [
        (
            WorkflowDefinition::new("Unknown").with_step(WorkflowStep::new("Teleport")),
            "unknown step type",
        ),
        (
            WorkflowDefinition::new("Missing").with_step(
                WorkflowStep::new("SendEmail").with_parameter(Parameter::string("to", "a@example.com")),
            ),
            "missing required parameter 'subject'",
        ),
        (
            WorkflowDefinition::new("Duplicate")
                .with_variable(Parameter::new("limit", VariableType::Int, "1"))
                .with_variable(Parameter::new("LIMIT", VariableType::Int, "2"))
                .with_step(log_step("hi")),
            "declared more than once",
        ),
        (
            WorkflowDefinition::new("Unparsable")
                .with_variable(Parameter::new("limit", VariableType::Int, "ten"))
                .with_step(log_step("hi")),
            "'ten' is not a valid int",
        ),
    ];

    for (definition, needle) in cases {
        let name = definition.workflow_name.clone();
        let err = workflows.save_workflow(definition).await.unwrap_err();
        match err {
            PlatformError::WorkflowValidation { violations, .. } => assert!(
                violations.iter().any(|v| v.contains(needle)),
                "{name}: {violations:?} should mention {needle:?}"
            ),
            other => panic!("{name}: expected workflow validation, got {other:?}"),
        }
        assert!(workflows.list_versions(&name).await.is_empty());
        assert!(workflows.history(&name).await.is_empty());
    }
}

#[tokio::test]
async fn create_entity_scaffold_maps_required_non_key_fields() {
    let platform = invoice_platform().await;
    let step = platform
        .workflows()
        .scaffold_step("CreateEntity", Some("Invoice"))
        .await
        .unwrap();

    let keys: Vec<&str> = step.parameters.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["model", "OrderId", "Total"]);
    assert_eq!(step.parameters[0].value, "Invoice");
    assert_eq!(step.parameters[1].declared_type, VariableType::Int);
    assert_eq!(step.parameters[2].value, "{{input.Total}}");
}

fn two_invoices(transactional: bool) -> WorkflowDefinition {
    WorkflowDefinition::new("TwoInvoices")
        .transactional(transactional)
        .with_step(
            WorkflowStep::new("CreateEntity")
                .with_parameter(Parameter::string("model", "Invoice"))
                .with_parameter(Parameter::new("OrderId", VariableType::Int, "{{input.OrderId}}"))
                .with_parameter(Parameter::new("Total", VariableType::Double, "{{input.Total}}")),
        )
        .with_step(
            WorkflowStep::new("CreateEntity")
                .with_parameter(Parameter::string("model", "Invoice"))
                .with_parameter(Parameter::new("OrderId", VariableType::Int, "7")),
        )
}

#[tokio::test]
async fn transactional_run_commits_nothing_when_a_step_fails() {
    let platform = invoice_platform().await;
    platform.workflows().save_workflow(two_invoices(true)).await.unwrap();

    let err = platform
        .workflows()
        .run("TwoInvoices", json!({ "OrderId": 1, "Total": 9.5 }), Value::Null)
        .await
        .unwrap_err();

    match err {
        PlatformError::StepExecution {
            step_index,
            rolled_back,
            ..
        } => {
            assert_eq!(step_index, 1);
            assert!(rolled_back);
        }
        other => panic!("expected step execution failure, got {other:?}"),
    }
    assert!(platform.data().get_all("Invoice").await.unwrap().is_empty());
}

#[tokio::test]
async fn non_transactional_run_keeps_completed_steps() {
    let platform = invoice_platform().await;
    platform.workflows().save_workflow(two_invoices(false)).await.unwrap();

    let err = platform
        .workflows()
        .run("TwoInvoices", json!({ "OrderId": 1, "Total": 9.5 }), Value::Null)
        .await
        .unwrap_err();

    assert!(matches!(err, PlatformError::StepExecution { rolled_back: false, .. }));
    let invoices = platform.data().get_all("Invoice").await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["OrderId"], json!(1));
    assert_eq!(invoices[0]["Total"], json!(9.5));
}

#[tokio::test]
async fn steps_chain_outputs_and_sub_workflows() {
    let outbox = Arc::new(OutboxEmailSender::new());
    let platform = Platform::builder()
        .email_sender(outbox.clone())
        .build()
        .await
        .unwrap();
    platform.regenerate(vec![invoice()]).await.unwrap();
    let workflows = platform.workflows();

    workflows
        .save_workflow(
            WorkflowDefinition::new("Notify")
                .with_variable(Parameter::string("sender", "billing"))
                .with_step(
                    WorkflowStep::new("SendEmail")
                        .with_parameter(Parameter::string("to", "{{context.email}}"))
                        .with_parameter(Parameter::string(
                            "subject",
                            "Invoice {{input.InvoiceId}} from {{sender}}",
                        )),
                ),
        )
        .await
        .unwrap();
    workflows
        .save_workflow(
            WorkflowDefinition::new("Bill")
                .with_step(
                    WorkflowStep::new("CreateEntity")
                        .with_parameter(Parameter::string("model", "Invoice"))
                        .with_parameter(Parameter::new("OrderId", VariableType::Int, "{{input.OrderId}}"))
                        .with_parameter(Parameter::new("Total", VariableType::Double, "{{input.Total}}"))
                        .output("invoice"),
                )
                .with_step(
                    WorkflowStep::new("SubWorkflow").with_parameter(Parameter::string("workflow", "Notify")),
                ),
        )
        .await
        .unwrap();

    let result = workflows
        .run(
            "Bill",
            json!({ "OrderId": 42, "Total": 10 }),
            json!({ "email": "ops@example.com" }),
        )
        .await
        .unwrap();

    assert_eq!(result.variables["invoice"]["InvoiceId"], json!(1));
    let sent = outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ops@example.com");
    assert_eq!(sent[0].subject, "Invoice 1 from billing");
}

#[tokio::test]
async fn self_referencing_sub_workflow_hits_the_depth_limit() {
    let platform = Platform::in_memory().await.unwrap();
    let workflows = platform.workflows();
    workflows
        .save_workflow(
            WorkflowDefinition::new("Loop").with_step(
                WorkflowStep::new("SubWorkflow").with_parameter(Parameter::string("workflow", "Loop")),
            ),
        )
        .await
        .unwrap();

    let err = workflows.run("Loop", json!({}), Value::Null).await.unwrap_err();
    assert_eq!(err.reason(), "step_execution");
    assert!(err.to_string().contains("nesting depth"));
}

#[tokio::test]
async fn running_an_unknown_workflow_fails() {
    let platform = Platform::in_memory().await.unwrap();
    let err = platform
        .workflows()
        .run("Ghost", json!({}), Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "workflow_not_found");
}

#[tokio::test]
async fn reseeding_an_unchanged_workflow_adds_no_version() {
    let dir = TempDir::new().unwrap();
    let config = PlatformConfig::new().data_dir(dir.path());
    let definition = WorkflowDefinition::new("Nightly").with_step(log_step("tick"));

    let first = Platform::builder().config(config.clone()).build().await.unwrap();
    assert_eq!(first.workflows().seed_workflow(definition.clone()).await.unwrap(), (1, true));
    drop(first);

    let second = Platform::builder().config(config).build().await.unwrap();
    let workflows = second.workflows();
    assert_eq!(workflows.seed_workflow(definition).await.unwrap(), (1, false));
    assert_eq!(workflows.history("Nightly").await.len(), 1);

    let changed = WorkflowDefinition::new("Nightly").with_step(log_step("tock"));
    assert_eq!(workflows.seed_workflow(changed).await.unwrap(), (2, true));
    assert_eq!(workflows.list_versions("Nightly").await, vec![1, 2]);
}
