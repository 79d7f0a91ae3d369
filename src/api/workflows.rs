//! Workflow management REST API.
//!
//! CRUD over workflow definitions with hot-reload: every change lands in
//! storage, swaps into the registry, and re-wires the workflow's schedule
//! and webhook trigger bindings. Also exposes manual runs, execution
//! history, the node-type catalog, and the schedule table.

use crate::error::EngineError;
use crate::nodes::NodeTypeRegistry;
use crate::runtime::scheduler::ScheduleCallback;
use crate::runtime::{Scheduler, WebhookRouter, WorkflowEngine};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{ExecutionResult, WorkflowDefinition};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared application state for every API handler.
#[derive(Clone)]
pub struct AppState {
    pub store: WorkflowStore,
    pub registry: Arc<WorkflowRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub webhooks: Arc<WebhookRouter>,
    pub engine: Arc<WorkflowEngine>,
    pub node_registry: Arc<NodeTypeRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct SaveWorkflowRequest {
    pub workflow: WorkflowDefinition,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::error!("{context}: {e}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}", put(update_workflow))
        .route("/api/workflows/{id}", delete(delete_workflow))
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/node-types", get(list_node_types))
        .route("/api/schedules", get(list_schedules))
}

/// Run one workflow from the registry and persist the execution record.
///
/// This is the single entry point shared by manual runs, schedule firings,
/// and webhook dispatches. A history write failure is logged, never allowed
/// to swallow the run result.
pub async fn run_and_record(
    engine: &WorkflowEngine,
    registry: &WorkflowRegistry,
    store: &WorkflowStore,
    workflow_id: &str,
    payload: Value,
) -> anyhow::Result<ExecutionResult> {
    let def = registry
        .get(workflow_id)
        .ok_or_else(|| anyhow::anyhow!("unknown workflow '{workflow_id}'"))?;

    let result = engine.run(&def, payload).await?;

    if let Err(e) = store.save_execution(&result).await {
        tracing::error!("failed to record execution {}: {}", result.id, e);
    }
    Ok(result)
}

/// Wire a definition's trigger bindings: at most one schedule timer and one
/// webhook route per workflow, both replaced on every save and released
/// when the definition no longer carries the trigger.
pub async fn activate_workflow(state: &AppState, def: &WorkflowDefinition) -> anyhow::Result<()> {
    match def.nodes_of_type("schedule_trigger").next() {
        Some(node) => {
            let expression = node
                .config
                .get("schedule")
                .and_then(|s| s.as_str())
                .ok_or_else(|| {
                    anyhow::anyhow!("schedule_trigger '{}' missing 'schedule' config", node.id)
                })?;

            let engine = Arc::clone(&state.engine);
            let registry = Arc::clone(&state.registry);
            let store = state.store.clone();
            let workflow_id = def.id.clone();
            let callback: ScheduleCallback = Arc::new(move || {
                let engine = Arc::clone(&engine);
                let registry = Arc::clone(&registry);
                let store = store.clone();
                let workflow_id = workflow_id.clone();
                Box::pin(async move {
                    run_and_record(&engine, &registry, &store, &workflow_id, Value::Null).await?;
                    Ok(())
                })
            });

            state.scheduler.schedule(&def.id, expression, callback).await?;
        }
        None => {
            state.scheduler.unschedule(&def.id).await;
        }
    }

    match def.nodes_of_type("webhook_trigger").next() {
        Some(node) => {
            let path = node.config.get("path").and_then(|p| p.as_str()).ok_or_else(|| {
                anyhow::anyhow!("webhook_trigger '{}' missing 'path' config", node.id)
            })?;
            let method = node
                .config
                .get("method")
                .and_then(|m| m.as_str())
                .unwrap_or("POST");
            state.webhooks.register(&def.id, path, method).await;
        }
        None => {
            state.webhooks.deregister(&def.id).await;
        }
    }

    Ok(())
}

/// Release a workflow's trigger bindings.
pub async fn deactivate_workflow(state: &AppState, workflow_id: &str) {
    state.scheduler.unschedule(workflow_id).await;
    state.webhooks.deregister(workflow_id).await;
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<Value>, ApiError> {
    let def = payload.workflow;

    state
        .engine
        .validate(&def)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.store.get_workflow(&def.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("workflow '{}' already exists", def.id),
            ))
        }
        Ok(None) => {}
        Err(e) => return Err(internal_error("failed to check for existing workflow", e)),
    }

    save_and_activate(&state, def).await
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut def = payload.workflow;
    def.id = id.clone();

    state
        .engine
        .validate(&def)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.store.get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("workflow '{id}' not found"),
            ))
        }
        Err(e) => return Err(internal_error("failed to load workflow", e)),
    }

    save_and_activate(&state, def).await
}

async fn save_and_activate(
    state: &AppState,
    def: WorkflowDefinition,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .save_workflow(&def)
        .await
        .map_err(|e| internal_error("failed to save workflow", e))?;

    state
        .registry
        .reload(&def.id)
        .await
        .map_err(|e| internal_error("failed to reload workflow into registry", e))?;

    activate_workflow(state, &def)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;

    tracing::info!("🔥 workflow '{}' saved and activated", def.id);
    Ok(Json(json!({
        "id": def.id,
        "message": format!("workflow '{}' saved", def.name),
    })))
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .store
        .list_workflows()
        .await
        .map_err(|e| internal_error("failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    match state.store.get_workflow(&id).await {
        Ok(Some(def)) => Ok(Json(def)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("workflow '{id}' not found"),
        )),
        Err(e) => Err(internal_error("failed to load workflow", e)),
    }
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    deactivate_workflow(&state, &id).await;
    state.registry.remove(&id);

    match state.store.delete_workflow(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ deleted workflow '{}'", id);
            Ok(Json(json!({ "message": "workflow deleted" })))
        }
        Ok(false) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("workflow '{id}' not found"),
        )),
        Err(e) => Err(internal_error("failed to delete workflow", e)),
    }
}

/// Manual run: the request body becomes the trigger payload. A failed run is
/// still a 200 with the full execution report; only pre-run validation
/// problems are 4xx.
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<ExecutionResult>, ApiError> {
    if state.registry.get(&id).is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("workflow '{id}' not found"),
        ));
    }

    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };

    match run_and_record(&state.engine, &state.registry, &state.store, &id, payload).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => match e.downcast_ref::<EngineError>() {
            Some(EngineError::Validation(_)) => {
                Err(api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))
            }
            _ => Err(internal_error("workflow run failed", e)),
        },
    }
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(20u32);

    let executions = state
        .store
        .list_executions(&id, limit)
        .await
        .map_err(|e| internal_error("failed to list executions", e))?;
    Ok(Json(json!({ "executions": executions })))
}

/// UI-facing node catalog from the registry descriptors.
async fn list_node_types(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "nodeTypes": state.node_registry.descriptors() }))
}

async fn list_schedules(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "schedules": state.scheduler.snapshot().await }))
}
