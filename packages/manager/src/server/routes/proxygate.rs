//! Proxy-source management. The refresh crawler itself is external; the
//! refresh endpoint just re-queues every active source for it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::domain::ProxySource;
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PatchSourceRequest {
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub queued: u64,
}

pub async fn proxy_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.proxies.stats().await?))
}

pub async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<ProxySource>>> {
    Ok(Json(state.proxies.list().await?))
}

pub async fn create_source(
    State(state): State<AppState>,
    Json(request): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<ProxySource>)> {
    if request.url.trim().is_empty() {
        return Err(Error::InvalidInput("source url is required".to_string()));
    }
    let source = ProxySource::new(request.url);
    state.proxies.create(&source).await?;
    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.proxies.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn patch_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PatchSourceRequest>,
) -> Result<StatusCode> {
    state.proxies.set_active(id, request.active).await?;
    Ok(StatusCode::OK)
}

pub async fn refresh_sources(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let queued = state.proxies.mark_active_pending().await?;
    Ok(Json(RefreshResponse { queued }))
}
