//! Worker endpoints: registration, heartbeat, and the claim protocol.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::domain::{Task, Worker};
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct FailRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Claimed-task payload handed to a worker. The opaque payload bytes are
/// JSON on the wire, so they are embedded as a JSON value.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub task_id: String,
    pub priority: i32,
    pub payload_type: String,
    pub parent_job_id: Option<uuid::Uuid>,
    pub payload: serde_json::Value,
}

impl ClaimedTask {
    fn from_task(task: Task) -> Result<Self> {
        let payload = serde_json::from_slice(&task.payload)
            .map_err(|e| Error::Internal(anyhow::anyhow!("task payload is not JSON: {e}")))?;
        Ok(Self {
            task_id: task.id,
            priority: task.priority,
            payload_type: task.payload_type,
            parent_job_id: task.parent_job_id,
            payload,
        })
    }
}

pub async fn list_workers(State(state): State<AppState>) -> Result<Json<Vec<Worker>>> {
    Ok(Json(state.registry.list().await?))
}

pub async fn worker_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.registry.stats().await?))
}

pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Worker>)> {
    if request.id.trim().is_empty() {
        return Err(Error::InvalidInput("worker id is required".to_string()));
    }
    let worker = state.registry.register(request.id, request.name).await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

pub async fn heartbeat_worker(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<Worker>> {
    Ok(Json(state.registry.heartbeat(&request.worker_id).await?))
}

pub async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Worker>> {
    Ok(Json(state.registry.get(&id).await?))
}

pub async fn delete_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.registry.unregister(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 200 with the task, or 204 when there is no work — not an error.
pub async fn claim_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    match state.registry.claim(&id).await? {
        Some(task) => Ok(Json(ClaimedTask::from_task(task)?).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Worker>> {
    Ok(Json(state.registry.complete(&id).await?))
}

pub async fn fail_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FailRequest>>,
) -> Result<Json<Worker>> {
    let message = body
        .and_then(|Json(request)| request.message)
        .unwrap_or_else(|| "worker reported failure".to_string());
    Ok(Json(state.registry.fail(&id, &message).await?))
}

pub async fn release_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Worker>> {
    Ok(Json(state.registry.release(&id).await?))
}
