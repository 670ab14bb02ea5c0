use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::common::Result;
use crate::server::app::AppState;

pub async fn dashboard_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.stats.dashboard().await?))
}
