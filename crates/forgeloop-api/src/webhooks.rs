//! `POST /webhooks/pr-validation` and `POST /webhooks/pr-update` (spec.md §6).
//!
//! Both handlers do the minimum the spec asks for: parse the body (axum's
//! `Json` extractor itself returns 400 on a missing required field), forward
//! the event to the workflow's single-writer inbox, and shape the response.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use forgeloop_workflow::Trigger;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    #[allow(dead_code)]
    pub title: String,
    #[allow(dead_code)]
    pub head_sha: String,
    #[allow(dead_code)]
    pub base_branch: String,
    #[allow(dead_code)]
    pub head_branch: String,
}

#[derive(Debug, Deserialize)]
pub struct PrValidationRequest {
    pub repository: String,
    pub pull_request: PullRequestInfo,
    #[serde(default)]
    pub validation_config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PrValidationResponse {
    pub status: &'static str,
    pub validation_id: uuid::Uuid,
    pub repository: String,
    pub pr_number: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn pr_validation(
    State(state): State<AppState>,
    Json(req): Json<PrValidationRequest>,
) -> Result<Json<PrValidationResponse>, StatusCode> {
    let handle = state
        .workflow_for_repository(&req.repository)
        .ok_or(StatusCode::BAD_REQUEST)?;

    handle
        .send(Trigger::PrWebhookReceived {
            pr_number: req.pull_request.number,
        })
        .await
        .map_err(|err| {
            tracing::warn!(repository = %req.repository, error = %err, "pr-validation webhook rejected");
            StatusCode::BAD_REQUEST
        })?;

    Ok(Json(PrValidationResponse {
        status: "accepted",
        validation_id: uuid::Uuid::now_v7(),
        repository: req.repository,
        pr_number: req.pull_request.number,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PrUpdateRequest {
    pub repository: String,
    pub pull_request: PullRequestInfo,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct PrUpdateResponse {
    pub status: &'static str,
    pub action: String,
    pub pr_number: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn pr_update(
    State(state): State<AppState>,
    Json(req): Json<PrUpdateRequest>,
) -> Result<Json<PrUpdateResponse>, StatusCode> {
    if req.action == "opened" {
        if let Some(handle) = state.workflow_for_repository(&req.repository) {
            if let Err(err) = handle
                .send(Trigger::PrOpened {
                    pr_number: req.pull_request.number,
                })
                .await
            {
                tracing::debug!(repository = %req.repository, error = %err, "pr-update did not apply to current workflow state");
            }
        }
    }

    Ok(Json(PrUpdateResponse {
        status: "acknowledged",
        action: req.action,
        pr_number: req.pull_request.number,
        timestamp: Utc::now(),
    }))
}
