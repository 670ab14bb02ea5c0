//! End-to-end control-plane scenarios over the HTTP surface.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::spawn_app;

fn job_payload(keywords: &[&str], priority: i32) -> Value {
    json!({
        "name": "integration job",
        "priority": priority,
        "keywords": keywords,
        "language": "en",
        "extract_emails": true,
    })
}

fn place(id: &str) -> Value {
    json!({ "place_id": id, "title": format!("Place {id}") })
}

/// Create → claim → submit → complete, twice; the parent finishes on the
/// second result.
#[tokio::test]
async fn create_to_complete_lifecycle() {
    let app = spawn_app(None).await;

    let created = app
        .post("/api/v2/jobs", job_payload(&["pizza", "coffee"], 0))
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["status"], "queued");
    assert_eq!(created.body["total_tasks"], 2);
    let job_id = created.body["id"].as_str().unwrap().to_string();

    // Both task messages landed on the default queue.
    assert_eq!(app.broker.queue_depth("default").unwrap(), 2);

    let registered = app
        .post("/api/v2/workers/register", json!({ "id": "w1" }))
        .await;
    assert_eq!(registered.status, StatusCode::CREATED);

    for i in 0..2 {
        let claimed = app.post_empty("/api/v2/workers/w1/claim").await;
        assert_eq!(claimed.status, StatusCode::OK);
        let task_id = claimed.body["task_id"].as_str().unwrap().to_string();

        let submitted = app
            .post(
                &format!("/api/v2/jobs/{job_id}/results"),
                json!({ "task_id": task_id, "places": [place(&format!("p{i}"))] }),
            )
            .await;
        assert_eq!(submitted.status, StatusCode::ACCEPTED);

        let completed = app.post_empty("/api/v2/workers/w1/complete").await;
        assert_eq!(completed.status, StatusCode::OK);
    }

    let job = app.get(&format!("/api/v2/jobs/{job_id}")).await;
    assert_eq!(job.body["status"], "completed");
    assert_eq!(job.body["total_tasks"], 2);
    assert_eq!(job.body["completed_tasks"], 2);
    assert!(!job.body["completed_at"].is_null());

    // No further claims: the queue of claimable tasks is empty.
    let claim = app.post_empty("/api/v2/workers/w1/claim").await;
    assert_eq!(claim.status, StatusCode::NO_CONTENT);
}

/// Pause/resume honor the state machine and reject repeats with 409.
#[tokio::test]
async fn pause_resume_transitions() {
    let app = spawn_app(None).await;
    let created = app.post("/api/v2/jobs", job_payload(&["tacos"], 0)).await;
    let job_id = created.body["id"].as_str().unwrap().to_string();

    // A claim moves the queued parent to running.
    app.post("/api/v2/workers/register", json!({ "id": "w1" }))
        .await;
    app.post_empty("/api/v2/workers/w1/claim").await;
    let job = app.get(&format!("/api/v2/jobs/{job_id}")).await;
    assert_eq!(job.body["status"], "running");

    let paused = app
        .post_empty(&format!("/api/v2/jobs/{job_id}/pause"))
        .await;
    assert_eq!(paused.status, StatusCode::OK);
    assert_eq!(paused.body["status"], "paused");

    let again = app
        .post_empty(&format!("/api/v2/jobs/{job_id}/pause"))
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.body["code"], 409);

    let resumed = app
        .post_empty(&format!("/api/v2/jobs/{job_id}/resume"))
        .await;
    assert_eq!(resumed.status, StatusCode::OK);
    assert_eq!(resumed.body["status"], "pending");

    let again = app
        .post_empty(&format!("/api/v2/jobs/{job_id}/resume"))
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn priority_classes_route_to_their_queues() {
    let app = spawn_app(None).await;
    for (priority, queue) in [(12, "critical"), (7, "high"), (0, "default"), (-3, "low")] {
        let before = app.broker.queue_depth(queue).unwrap();
        let created = app
            .post("/api/v2/jobs", job_payload(&["kw"], priority))
            .await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(app.broker.queue_depth(queue).unwrap(), before + 1);
    }
}

#[tokio::test]
async fn deleting_a_running_job_is_rejected() {
    let app = spawn_app(None).await;
    let created = app.post("/api/v2/jobs", job_payload(&["kw"], 0)).await;
    let job_id = created.body["id"].as_str().unwrap().to_string();
    app.post("/api/v2/workers/register", json!({ "id": "w1" }))
        .await;
    app.post_empty("/api/v2/workers/w1/claim").await;

    let deleted = app
        .request("DELETE", &format!("/api/v2/jobs/{job_id}"), None, None)
        .await;
    assert_eq!(deleted.status, StatusCode::CONFLICT);

    app.post_empty(&format!("/api/v2/jobs/{job_id}/cancel")).await;
    let deleted = app
        .request("DELETE", &format!("/api/v2/jobs/{job_id}"), None, None)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let job = app.get(&format!("/api/v2/jobs/{job_id}")).await;
    assert_eq!(job.status, StatusCode::NOT_FOUND);
    assert_eq!(job.body["code"], 404);
}

#[tokio::test]
async fn job_without_keywords_is_a_400() {
    let app = spawn_app(None).await;
    let created = app
        .post(
            "/api/v2/jobs",
            json!({ "name": "empty", "keywords": [] }),
        )
        .await;
    assert_eq!(created.status, StatusCode::BAD_REQUEST);
    assert_eq!(created.body["code"], 400);
    assert!(created.body["message"].as_str().unwrap().contains("keyword"));
}

#[tokio::test]
async fn results_listing_and_download() {
    let app = spawn_app(None).await;
    let created = app.post("/api/v2/jobs", job_payload(&["kw"], 0)).await;
    let job_id = created.body["id"].as_str().unwrap().to_string();
    app.post("/api/v2/workers/register", json!({ "id": "w1" }))
        .await;
    let claimed = app.post_empty("/api/v2/workers/w1/claim").await;
    let task_id = claimed.body["task_id"].as_str().unwrap().to_string();

    app.post(
        &format!("/api/v2/jobs/{job_id}/results"),
        json!({
            "task_id": task_id,
            "places": [
                { "place_id": "a", "title": "A", "emails": ["alice@acme.io", "noreply@acme.io"] },
            ],
        }),
    )
    .await;

    // The background flush loop is not running in tests; listing reflects
    // the store only after an explicit flush, but stats and parent
    // progress already moved via the direct sync.
    let job = app.get(&format!("/api/v2/jobs/{job_id}")).await;
    assert_eq!(job.body["completed_tasks"], 1);
    assert_eq!(job.body["status"], "completed");

    let download = app
        .get(&format!("/api/v2/jobs/{job_id}/download?format=json"))
        .await;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(
        download.headers["content-type"].to_str().unwrap(),
        "application/json"
    );

    let unsupported = app
        .get(&format!("/api/v2/jobs/{job_id}/download?format=xlsx"))
        .await;
    assert_eq!(unsupported.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn worker_lifecycle_endpoints() {
    let app = spawn_app(None).await;
    app.post(
        "/api/v2/workers/register",
        json!({ "id": "w1", "name": "alpha" }),
    )
    .await;

    let beat = app
        .post("/api/v2/workers/heartbeat", json!({ "worker_id": "w1" }))
        .await;
    assert_eq!(beat.status, StatusCode::OK);
    assert_eq!(beat.body["status"], "online");

    let stats = app.get("/api/v2/workers/stats").await;
    assert_eq!(stats.body["total"], 1);
    assert_eq!(stats.body["online"], 1);

    let gone = app
        .request("DELETE", "/api/v2/workers/w1", None, None)
        .await;
    assert_eq!(gone.status, StatusCode::NO_CONTENT);
    assert_eq!(app.get("/api/v2/workers/w1").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proxygate_crud_and_refresh() {
    let app = spawn_app(None).await;
    let created = app
        .post(
            "/api/v2/proxygate/sources",
            json!({ "url": "https://proxies.example/a.txt" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let source_id = created.body["id"].as_str().unwrap().to_string();

    let refreshed = app.post_empty("/api/v2/proxygate/refresh").await;
    assert_eq!(refreshed.body["queued"], 1);

    let patched = app
        .request(
            "PATCH",
            &format!("/api/v2/proxygate/sources/{source_id}"),
            Some(json!({ "active": false })),
            None,
        )
        .await;
    assert_eq!(patched.status, StatusCode::OK);

    let stats = app.get("/api/v2/proxygate/stats").await;
    assert_eq!(stats.body["total"], 1);
    assert_eq!(stats.body["active"], 0);

    let deleted = app
        .request(
            "DELETE",
            &format!("/api/v2/proxygate/sources/{source_id}"),
            None,
            None,
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn dashboard_stats_shape() {
    let app = spawn_app(None).await;
    app.post("/api/v2/jobs", job_payload(&["kw"], 0)).await;

    let stats = app.get("/api/v2/stats").await;
    assert_eq!(stats.status, StatusCode::OK);
    assert_eq!(stats.body["jobs"]["total"], 1);
    assert_eq!(stats.body["jobs"]["queued"], 1);
    assert!(stats.body["workers"]["total"].is_number());
    assert!(stats.body["places"]["total_scraped"].is_number());
}
