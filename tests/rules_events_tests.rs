use schemaflow::events::{FnHandler, HandlerFuture};
use schemaflow::{
    Event, EventKind, ModelDeclaration, OutboxEmailSender, Parameter, Platform, PropertyDecl,
    PropertyType, Record, Rule, RuleWorkflow, WorkflowDefinition, WorkflowStep,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object literal")
}

fn invoice() -> ModelDeclaration {
    ModelDeclaration::new("Invoice")
        .with_property(PropertyDecl::new("InvoiceId", PropertyType::Int32).key())
        .with_property(PropertyDecl::new("Total", PropertyType::Decimal).required())
}

async fn platform_with_outbox() -> (Platform, Arc<OutboxEmailSender>) {
    let outbox = Arc::new(OutboxEmailSender::new());
    let platform = Platform::builder()
        .email_sender(outbox.clone())
        .build()
        .await
        .unwrap();
    platform.regenerate(vec![invoice()]).await.unwrap();
    (platform, outbox)
}

#[tokio::test]
async fn side_effect_rule_triggers_workflow_after_commit() {
    let (platform, outbox) = platform_with_outbox().await;
    platform
        .workflows()
        .save_workflow(
            WorkflowDefinition::new("Escalate").with_step(
                WorkflowStep::new("SendEmail")
                    .with_parameter(Parameter::string("to", "audit@example.com"))
                    .with_parameter(Parameter::string("subject", "Large invoice {{input.InvoiceId}}")),
            ),
        )
        .await
        .unwrap();
    platform
        .rules()
        .register(
            RuleWorkflow::new("Invoice.Create")
                .with_rule(Rule::side_effect("large-invoice", "Total > 1000", "Escalate")),
        )
        .await
        .unwrap();

    let data = platform.data();
    data.add("Invoice", record(json!({ "Total": 50 }))).await.unwrap();
    assert!(outbox.sent().is_empty());

    data.add("Invoice", record(json!({ "Total": 5000 }))).await.unwrap();
    let sent = outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Large invoice 2");
}

#[tokio::test]
async fn failing_side_effect_does_not_undo_the_mutation() {
    let (platform, _) = platform_with_outbox().await;
    platform
        .rules()
        .register(
            RuleWorkflow::new("Invoice.Create")
                .with_rule(Rule::side_effect("always", "Total > 0", "DoesNotExist")),
        )
        .await
        .unwrap();

    let stored = platform
        .data()
        .add("Invoice", record(json!({ "Total": 10 })))
        .await
        .unwrap();
    assert_eq!(stored["InvoiceId"], json!(1));
    assert_eq!(platform.data().get_all("Invoice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_rule_expressions_are_rejected_on_registration() {
    let (platform, _) = platform_with_outbox().await;
    let err = platform
        .rules()
        .register(RuleWorkflow::new("Invoice.Update").with_rule(Rule::validation("broken", "Total >")))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "expression_error");
    assert!(!platform.rules().has_workflow("Invoice.Update").await);
}

#[tokio::test]
async fn delete_rules_see_the_stored_record() {
    let (platform, _) = platform_with_outbox().await;
    platform
        .rules()
        .register(
            RuleWorkflow::new("Invoice.Delete").with_rule(
                Rule::validation("only-small", "Total < 100").with_message("large invoices are kept"),
            ),
        )
        .await
        .unwrap();

    let data = platform.data();
    data.add("Invoice", record(json!({ "Total": 500 }))).await.unwrap();
    data.add("Invoice", record(json!({ "Total": 5 }))).await.unwrap();

    let err = data.delete("Invoice", &json!(1)).await.unwrap_err();
    assert_eq!(err.reason(), "rule_failure");
    assert!(data.delete("Invoice", &json!(2)).await.unwrap());
    assert_eq!(data.get_all("Invoice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn schema_regeneration_is_announced() {
    let platform = Platform::in_memory().await.unwrap();
    let versions: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = versions.clone();
    platform
        .bus()
        .subscribe(
            EventKind::SchemaRegenerated,
            Arc::new(FnHandler::new("versions", move |event: Event| -> HandlerFuture {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().unwrap().push(event.payload["version"].clone());
                    Ok(())
                })
            })),
        )
        .await;

    platform.regenerate(vec![invoice()]).await.unwrap();
    platform.regenerate(vec![invoice()]).await.unwrap();
    platform
        .regenerate(vec![invoice().with_property(PropertyDecl::new("Note", PropertyType::String))])
        .await
        .unwrap();

    assert_eq!(*versions.lock().unwrap(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn stored_workflows_are_rechecked_against_a_new_schema() {
    let (platform, _) = platform_with_outbox().await;
    platform
        .workflows()
        .save_workflow(
            WorkflowDefinition::new("Bill").with_step(
                WorkflowStep::new("CreateEntity")
                    .with_parameter(Parameter::string("model", "Invoice"))
                    .with_parameter(Parameter::string("Total", "{{input.Total}}")),
            ),
        )
        .await
        .unwrap();
    assert!(platform.workflows().revalidate_all().await.is_empty());

    platform
        .regenerate(vec![
            ModelDeclaration::new("Receipt")
                .with_property(PropertyDecl::new("ReceiptId", PropertyType::Int32).key()),
        ])
        .await
        .unwrap();

    let stale = platform.workflows().revalidate_all().await;
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].0, "Bill");
    assert!(stale[0].1.iter().any(|v| v.contains("unknown model 'Invoice'")));
}
