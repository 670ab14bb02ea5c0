//! Global result listing and download.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::common::pagination::{Paged, PageParams};
use crate::common::Result;
use crate::server::app::AppState;
use crate::server::routes::jobs::{download, DownloadQuery};

pub async fn list_results(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let page = params.normalize();
    let items = state.results.list(None, page).await?;
    let total = state.results.count(None).await?;
    Ok(Json(Paged::new(items, page, total)))
}

pub async fn download_results(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    download(&state, None, &query).await
}
