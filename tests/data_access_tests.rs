use schemaflow::events::{FnHandler, HandlerFuture};
use schemaflow::expression::parse_expression;
use schemaflow::{
    Event, EventKind, ModelDeclaration, Platform, PlatformError, PropertyDecl, PropertyType,
    Record, Rule, RuleWorkflow,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object literal")
}

async fn platform() -> Platform {
    let platform = Platform::in_memory().await.expect("platform");
    platform
        .regenerate(vec![
            ModelDeclaration::new("Product")
                .with_property(PropertyDecl::new("ProductId", PropertyType::Int32).key())
                .with_property(PropertyDecl::new("Name", PropertyType::String).required().max_length(12))
                .with_property(PropertyDecl::new("Price", PropertyType::Decimal).required())
                .with_property(PropertyDecl::new("Stock", PropertyType::Int16))
                .with_property(
                    PropertyDecl::new("Manual", PropertyType::FileAsset).allowed_extensions(["pdf"]),
                ),
        ])
        .await
        .expect("regenerate");
    platform
}

#[tokio::test]
async fn crud_round_trip_by_model_name() {
    let platform = platform().await;
    let data = platform.data();

    let created = data
        .add("product", record(json!({ "Name": "Lamp", "Price": 19.5 })))
        .await
        .unwrap();
    assert_eq!(created["ProductId"], json!(1));
    assert_eq!(created["Stock"], json!(null));

    let second = data
        .add("Product", record(json!({ "Name": "Desk", "Price": 120 })))
        .await
        .unwrap();
    assert_eq!(second["ProductId"], json!(2));

    let fetched = data.get_by_id("Product", &json!("1")).await.unwrap().unwrap();
    assert_eq!(fetched["Name"], json!("Lamp"));

    let merged = data
        .update("Product", record(json!({ "ProductId": 1, "Stock": 7 })))
        .await
        .unwrap();
    assert_eq!(merged["Name"], json!("Lamp"));
    assert_eq!(merged["Stock"], json!(7));

    assert!(data.delete("Product", &json!(2)).await.unwrap());
    assert!(!data.delete("Product", &json!(2)).await.unwrap());
    assert_eq!(data.get_all("Product").await.unwrap().len(), 1);
}

#[tokio::test]
async fn record_validation_collects_every_violation() {
    let platform = platform().await;
    let err = platform
        .data()
        .add(
            "Product",
            record(json!({
                "Name": "A name that is far too long",
                "Stock": 70000,
                "Manual": "guide.exe",
                "Colour": "red"
            })),
        )
        .await
        .unwrap_err();

    match err {
        PlatformError::RecordValidation { model, violations } => {
            assert_eq!(model, "Product");
            for needle in ["maxLength", "out of range", "extensions", "unknown field 'Colour'", "'Price' is required"] {
                assert!(
                    violations.iter().any(|v| v.contains(needle)),
                    "missing {needle:?} in {violations:?}"
                );
            }
        }
        other => panic!("expected record validation, got {other:?}"),
    }
    assert!(platform.data().get_all("Product").await.unwrap().is_empty());
}

#[tokio::test]
async fn request_level_errors_have_stable_reasons() {
    let platform = platform().await;
    let data = platform.data();

    let unknown = data.get_all("Warehouse").await.unwrap_err();
    assert_eq!(unknown.reason(), "unknown_model");

    let bad_key = data.get_by_id("Product", &json!("abc")).await.unwrap_err();
    assert_eq!(bad_key.reason(), "invalid_key");

    let missing = data
        .update("Product", record(json!({ "ProductId": 99, "Stock": 1 })))
        .await
        .unwrap_err();
    assert_eq!(missing.reason(), "not_found");

    data.add("Product", record(json!({ "ProductId": 5, "Name": "Pen", "Price": 1 })))
        .await
        .unwrap();
    let duplicate = data
        .add("Product", record(json!({ "ProductId": 5, "Name": "Pen", "Price": 1 })))
        .await
        .unwrap_err();
    assert_eq!(duplicate.reason(), "duplicate_key");
}

#[tokio::test]
async fn query_filters_and_limits() {
    let platform = platform().await;
    let data = platform.data();
    for (name, price) in [("Lamp", 20), ("Desk", 120), ("Chair", 80), ("Shelf", 150)] {
        data.add("Product", record(json!({ "Name": name, "Price": price })))
            .await
            .unwrap();
    }

    let filter = parse_expression("Price >= 100").unwrap();
    let expensive = data.query("Product", Some(&filter), None).await.unwrap();
    let names: Vec<&str> = expensive.iter().filter_map(|r| r["Name"].as_str()).collect();
    assert_eq!(names, vec!["Desk", "Shelf"]);

    let limited = data.query("Product", None, Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn validation_rules_block_mutations() {
    let platform = platform().await;
    platform
        .rules()
        .register(
            RuleWorkflow::new("Product.Create")
                .with_rule(Rule::validation("positive-price", "Price > 0").with_message("price must be positive")),
        )
        .await
        .unwrap();

    let err = platform
        .data()
        .add("Product", record(json!({ "Name": "Free", "Price": 0 })))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "rule_failure");
    assert!(err.to_string().contains("price must be positive"));

    platform
        .data()
        .add("Product", record(json!({ "Name": "Paid", "Price": 3 })))
        .await
        .unwrap();
}

#[tokio::test]
async fn transaction_rolls_back_every_write_on_error() {
    let platform = platform().await;
    let result: schemaflow::Result<()> = platform
        .data()
        .transaction(|session| async move {
            session
                .add("Product", record(json!({ "Name": "Lamp", "Price": 10 })))
                .await?;
            session
                .add("Product", record(json!({ "Name": "Broken" })))
                .await?;
            Ok(())
        })
        .await;

    assert_eq!(result.unwrap_err().reason(), "record_validation");
    assert!(platform.data().get_all("Product").await.unwrap().is_empty());
}

#[tokio::test]
async fn lifecycle_events_follow_commits_only() {
    let platform = platform().await;
    let seen: Arc<Mutex<Vec<(EventKind, Value)>>> = Arc::default();
    let sink = seen.clone();
    let handler = FnHandler::new("recorder", move |event: Event| -> HandlerFuture {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().unwrap().push((event.kind, event.key.unwrap_or(Value::Null)));
            Ok(())
        })
    });
    let handler = Arc::new(handler);
    for kind in [EventKind::EntityCreated, EventKind::EntityUpdated, EventKind::EntityDeleted] {
        platform.bus().subscribe(kind, handler.clone()).await;
    }

    let data = platform.data();
    data.add("Product", record(json!({ "Name": "Lamp", "Price": 10 })))
        .await
        .unwrap();
    data.update("Product", record(json!({ "ProductId": 1, "Price": 12 })))
        .await
        .unwrap();
    data.add("Product", record(json!({ "Name": "Broken" })))
        .await
        .unwrap_err();
    data.delete("Product", &json!(1)).await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (EventKind::EntityCreated, json!(1)),
            (EventKind::EntityUpdated, json!(1)),
            (EventKind::EntityDeleted, json!(1)),
        ]
    );
}

#[tokio::test]
async fn coercion_edge_cases_are_validation_errors() {
    let platform = Platform::in_memory().await.unwrap();
    platform
        .regenerate(vec![
            ModelDeclaration::new("Shift")
                .with_property(PropertyDecl::new("ShiftId", PropertyType::Int32).key())
                .with_property(PropertyDecl::new("Length", PropertyType::Timespan))
                .with_property(PropertyDecl::new("Tally", PropertyType::Int64))
                .with_property(PropertyDecl::new("Slot", PropertyType::Int32))
                .with_property(PropertyDecl::new("Label", PropertyType::String).max_length(5)),
        ])
        .await
        .unwrap();
    let data = platform.data();

    let cases = [
        (json!({ "Length": "99999999999999.00:00:00" }), "Length"),
        (json!({ "Tally": 1e300 }), "Tally"),
        (json!({ "Slot": 2_147_483_648_i64 }), "out of range"),
        (json!({ "Label": "overnight" }), "maxLength"),
    ];
    for (input, needle) in cases {
        let err = data.add("Shift", record(input.clone())).await.unwrap_err();
        assert_eq!(err.reason(), "record_validation", "{input}");
        assert!(err.to_string().contains(needle), "{needle:?} not in {err}");
    }
    assert!(data.get_all("Shift").await.unwrap().is_empty());

    data.add("Shift", record(json!({ "Length": "08:30:00", "Tally": 9e15, "Label": "night" })))
        .await
        .unwrap();
    let err = data
        .update("Shift", record(json!({ "ShiftId": 1, "Tally": -1e19 })))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "record_validation");
    let stored = data.get_by_id("Shift", &json!(1)).await.unwrap().unwrap();
    assert_eq!(stored["Tally"], json!(9_000_000_000_000_000_i64));
}
