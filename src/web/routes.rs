use axum::Router;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{Result, WebError};
use crate::core::PlatformError;
use crate::expression::parse_expression;
use crate::facade::Platform;
use crate::registry::ModelDeclaration;
use crate::schema::Record;
use crate::workflow::{RunResult, WorkflowDefinition, WorkflowHistoryEntry, WorkflowStep};

/// Builds the REST router over a platform.
///
/// Routes:
/// - `GET /_schema`, `PUT /_models`
/// - `GET|POST /models/:model`
/// - `GET|PUT|DELETE /models/:model/:id`
/// - `GET|POST /workflows`, `GET /workflows/:name`, `GET /workflows/:name/history`
/// - `POST /workflows/:name/rollback/:version`, `POST /workflows/:name/run`
/// - `GET /steps/:step_type/scaffold`
pub fn router(platform: Arc<Platform>) -> Router {
    Router::new()
        .route("/_schema", get(describe_schema))
        .route("/_models", put(replace_models))
        .route("/models/:model", get(list_records).post(create_record))
        .route(
            "/models/:model/:id",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/workflows", get(list_workflows).post(save_workflow))
        .route("/workflows/:name", get(get_workflow))
        .route("/workflows/:name/history", get(workflow_history))
        .route("/workflows/:name/rollback/:version", post(rollback_workflow))
        .route("/workflows/:name/run", post(run_workflow))
        .route("/steps/:step_type/scaffold", get(scaffold_step))
        .layer(TraceLayer::new_for_http())
        .with_state(platform)
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    filter: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionParams {
    version: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ScaffoldParams {
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunRequest {
    input: Value,
    context: Value,
}

fn into_record(payload: Value) -> Result<Record> {
    match payload {
        Value::Object(record) => Ok(record),
        _ => Err(WebError::Input("request body must be a JSON object".to_string())),
    }
}

async fn describe_schema(State(platform): State<Arc<Platform>>) -> Json<Value> {
    Json(platform.current_generation().await.describe())
}

async fn replace_models(
    State(platform): State<Arc<Platform>>,
    Json(declarations): Json<Vec<ModelDeclaration>>,
) -> Result<Json<Value>> {
    let generation = platform.regenerate(declarations).await?;
    Ok(Json(generation.describe()))
}

async fn list_records(
    State(platform): State<Arc<Platform>>,
    Path(model): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
    let filter = params
        .filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(parse_expression)
        .transpose()?;
    let records = platform
        .data()
        .query(&model, filter.as_ref(), params.limit)
        .await?;
    Ok(Json(Value::Array(records.into_iter().map(Value::Object).collect())))
}

async fn create_record(
    State(platform): State<Arc<Platform>>,
    Path(model): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let stored = platform.data().add(&model, into_record(payload)?).await?;
    Ok((StatusCode::CREATED, Json(Value::Object(stored))).into_response())
}

async fn get_record(
    State(platform): State<Arc<Platform>>,
    Path((model, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let Some(record) = platform.data().get_by_id(&model, &Value::String(id.clone())).await? else {
        return Err(WebError::NotFound(format!(
            "entity '{}' not found in model '{}'",
            id, model
        )));
    };
    Ok(Json(Value::Object(record)))
}

/// The path id wins over any key field in the body.
async fn update_record(
    State(platform): State<Arc<Platform>>,
    Path((model, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let descriptor = platform.current_generation().await.descriptor(&model)?;
    let key_name = descriptor.key_field().name.clone();
    let mut record = into_record(payload)?;
    record.retain(|field, _| !field.eq_ignore_ascii_case(&key_name));
    record.insert(key_name, Value::String(id));
    let merged = platform.data().update(&model, record).await?;
    Ok(Json(Value::Object(merged)))
}

async fn delete_record(
    State(platform): State<Arc<Platform>>,
    Path((model, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    if platform.data().delete(&model, &Value::String(id.clone())).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WebError::NotFound(format!(
            "entity '{}' not found in model '{}'",
            id, model
        )))
    }
}

async fn list_workflows(State(platform): State<Arc<Platform>>) -> Json<Vec<WorkflowDefinition>> {
    Json(platform.workflows().list_workflows().await)
}

async fn save_workflow(
    State(platform): State<Arc<Platform>>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<Response> {
    let name = definition.workflow_name.clone();
    let version = platform.workflows().save_workflow(definition).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "workflowName": name, "version": version })),
    )
        .into_response())
}

async fn get_workflow(
    State(platform): State<Arc<Platform>>,
    Path(name): Path<String>,
    Query(params): Query<VersionParams>,
) -> Result<Json<WorkflowDefinition>> {
    let workflows = platform.workflows();
    let found = match params.version {
        Some(version) => workflows.get_workflow_version(&name, version).await,
        None => workflows.get_workflow(&name).await,
    };
    found
        .map(Json)
        .ok_or_else(|| WebError::from(PlatformError::WorkflowNotFound(name)))
}

async fn workflow_history(
    State(platform): State<Arc<Platform>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<WorkflowHistoryEntry>>> {
    let history = platform.workflows().history(&name).await;
    if history.is_empty() {
        return Err(WebError::NotFound(format!("workflow '{}' has no history", name)));
    }
    Ok(Json(history))
}

async fn rollback_workflow(
    State(platform): State<Arc<Platform>>,
    Path((name, version)): Path<(String, u32)>,
) -> Result<Json<Value>> {
    let workflows = platform.workflows();
    if !workflows.rollback_workflow(&name, version).await? {
        return Err(WebError::NotFound(format!(
            "workflow '{}' has no version {}",
            name, version
        )));
    }
    let latest = workflows.list_versions(&name).await.last().copied();
    Ok(Json(json!({
        "workflowName": name,
        "restoredFrom": version,
        "version": latest,
    })))
}

async fn run_workflow(
    State(platform): State<Arc<Platform>>,
    Path(name): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<RunResult>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let result = platform
        .workflows()
        .run(&name, request.input, request.context)
        .await?;
    Ok(Json(result))
}

async fn scaffold_step(
    State(platform): State<Arc<Platform>>,
    Path(step_type): Path<String>,
    Query(params): Query<ScaffoldParams>,
) -> Result<Json<WorkflowStep>> {
    let step = platform
        .workflows()
        .scaffold_step(&step_type, params.model.as_deref())
        .await?;
    Ok(Json(step))
}
