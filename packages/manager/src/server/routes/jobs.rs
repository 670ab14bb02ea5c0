//! Job endpoints: CRUD, lifecycle actions, per-job results and downloads.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::common::pagination::{Paged, PageParams};
use crate::common::{Error, Result};
use crate::domain::{Job, JobStatus};
use crate::server::app::AppState;
use crate::service::{CreateJobRequest, ResultSubmission};
use crate::storage::jobs::JobFilter;

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<Job>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(Error::InvalidInput)?;
    let jobs = state
        .jobs
        .list(&JobFilter {
            status,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(Json(jobs))
}

/// Create the job, then fan it out. The response carries the queued job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>)> {
    let job = state.jobs.create(request).await?;
    state.dispatcher.dispatch(&job).await?;
    let job = state.jobs.get(job.id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>> {
    Ok(Json(state.jobs.get(id).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.jobs.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>> {
    Ok(Json(state.jobs.pause(id).await?))
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>> {
    Ok(Json(state.jobs.resume(id).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>> {
    Ok(Json(state.jobs.cancel(id).await?))
}

pub async fn job_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.stats.job_counts().await?))
}

pub async fn list_job_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    state.jobs.get(id).await?;
    let page = params.normalize();
    let items = state.results.list(Some(id), page).await?;
    let total = state.results.count(Some(id)).await?;
    Ok(Json(Paged::new(items, page, total)))
}

/// Worker-facing batch submission for a finished task.
pub async fn submit_job_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(submission): Json<ResultSubmission>,
) -> Result<impl IntoResponse> {
    let outcome = state.ingester.submit(id, submission).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default = "default_format")]
    pub format: String,
    pub columns: Option<String>,
}

fn default_format() -> String {
    "json".to_string()
}

pub async fn download_job_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    state.jobs.get(id).await?;
    download(&state, Some(id), &query).await
}

pub(crate) async fn download(
    state: &AppState,
    job_id: Option<Uuid>,
    query: &DownloadQuery,
) -> Result<Response> {
    let exporter = state.exporters.get(&query.format)?.clone();
    let columns: Option<Vec<String>> = query
        .columns
        .as_deref()
        .map(|raw| raw.split(',').map(|c| c.trim().to_string()).collect());

    // Downloads are unpaged: walk the store in repository-page chunks.
    let mut places = Vec::new();
    let mut page = PageParams {
        page: Some(1),
        per_page: Some(500),
    }
    .normalize();
    loop {
        let batch = state.results.list(job_id, page).await?;
        let done = (batch.len() as i64) < page.per_page;
        places.extend(batch);
        if done {
            break;
        }
        page.page += 1;
        page.offset += page.per_page;
    }

    let bytes = exporter.export(&places, columns.as_deref())?;
    let filename = match job_id {
        Some(id) => format!("results-{id}.{}", exporter.format()),
        None => format!("results.{}", exporter.format()),
    };
    Ok((
        [
            (header::CONTENT_TYPE, exporter.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
