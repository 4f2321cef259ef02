//! CRUD-ish workflow routes consumed by `forgeloop-cli`. Not part of
//! spec.md §6's two webhook routes, but ambient operator surface the way
//! the teacher ships `runs.rs` alongside its webhook/agent routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use forgeloop_schemas::workflow::{Workflow, WorkflowMetadata};
use forgeloop_workflow::{Trigger, WorkflowId};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/workflows", post(start_workflow))
        .route("/v1/workflows/:id", get(get_workflow))
        .route("/v1/workflows/:id/cancel", post(cancel_workflow))
}

#[derive(Debug, Deserialize)]
pub struct StartWorkflowRequest {
    pub repository: String,
    pub goal: String,
    #[serde(default)]
    pub planning_hint: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub auto_confirm_plan: bool,
    #[serde(default)]
    pub auto_merge: bool,
}

pub async fn start_workflow(
    State(state): State<AppState>,
    Json(req): Json<StartWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), StatusCode> {
    if let Some(existing) = state.workflow_for_repository(&req.repository) {
        match state.store.get(existing.workflow_id()).await {
            Ok(workflow) if workflow.state.is_terminal() => {
                state.forget_repository(&req.repository);
            }
            _ => return Err(StatusCode::CONFLICT),
        }
    }

    let mut metadata = WorkflowMetadata::new(req.goal, req.max_iterations.unwrap_or(state.config.max_iterations));
    metadata.planning_hint = req.planning_hint;
    metadata.auto_confirm_plan = req.auto_confirm_plan;
    metadata.auto_merge = req.auto_merge;

    let workflow = Workflow::new(Uuid::now_v7(), metadata, Utc::now());
    state.store.put(workflow.clone()).await.map_err(|err| {
        tracing::error!(error = %err, "failed to persist new workflow");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let handle = state.runner.spawn(workflow.clone());
    state.register(req.repository, handle.clone());

    handle
        .send(Trigger::Start { project_configured: true })
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "failed to start workflow");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let current = state.store.get(workflow.id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((StatusCode::CREATED, Json(current)))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
) -> Result<Json<Workflow>, StatusCode> {
    state
        .store
        .get(id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
) -> Result<StatusCode, StatusCode> {
    let handle = state.workflow_by_id(id).ok_or(StatusCode::NOT_FOUND)?;
    handle
        .send(Trigger::Cancel)
        .await
        .map_err(|_| StatusCode::CONFLICT)?;
    Ok(StatusCode::OK)
}
