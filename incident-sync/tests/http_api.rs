use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use incident_model::{IncidentStatus, ReplayRequest, Severity};
use incident_sync::{ApiError, HttpIncidentApi, IncidentApi};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

fn record(id: &str, status: &str, created_at: &str) -> Value {
    json!({
        "incident_id": id,
        "severity": "HIGH",
        "status": status,
        "created_at": created_at,
        "estimated_users_affected": 1200.0,
        "blast_radius": ["payments-api", "checkout"],
        "actions_log": null,
        "suspect_commits": [{
            "commit_hash": "a1b2c3d",
            "message": "bump pool size",
            "author": "dev",
            "repo": "acme/payments",
            "confidence": "0.8"
        }]
    })
}

async fn list(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let limit: usize = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(20);
    let incidents: Vec<Value> = vec![
        record("inc-2", "war_room_posted", "2026-03-02T10:00:00Z"),
        record("inc-1", "escalated_to_humans", "2026-03-01T10:00:00Z"),
        json!({ "status": "triaged", "created_at": "2026-02-28T10:00:00Z" }),
    ]
    .into_iter()
    .take(limit)
    .collect();
    let count = incidents.len();
    Json(json!({ "incidents": incidents, "count": count }))
}

async fn detail(Path(id): Path<String>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if id == "inc-1" {
        Ok(Json(record("inc-1", "resolved", "2026-03-01T10:00:00Z")))
    } else {
        Err((StatusCode::NOT_FOUND, Json(json!({ "detail": "Incident not found" }))))
    }
}

async fn postmortem(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    if id == "inc-1" {
        (
            StatusCode::OK,
            Json(json!({ "incident_id": id, "content": "# Summary", "s3_path": "s3://pm/inc-1.md" })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Postmortem not yet generated" })),
        )
    }
}

async fn resolve(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    match body.get("incident_id").and_then(Value::as_str) {
        Some("inc-1") => (StatusCode::OK, Json(json!({ "incident_id": "inc-1", "status": "resolved" }))),
        Some("locked") => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": [{"msg": "boom"}] }))),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Incident not found" }))),
    }
}

async fn replay(Json(body): Json<Value>) -> Json<Value> {
    let id = if body.get("custom_payload").is_some() {
        "custom-1"
    } else {
        "abc123"
    };
    Json(json!({ "incident_id": id, "status": "ingested" }))
}

async fn repos() -> Json<Value> {
    Json(json!({
        "repos": [{
            "repo_id": "acme/payments",
            "github_url": "https://github.com/acme/payments",
            "connected_at": "2026-02-01T00:00:00Z",
            "incident_count": 3
        }],
        "count": 1
    }))
}

async fn serve() -> HttpIncidentApi {
    let app = Router::new()
        .route("/api/incidents", get(list))
        .route("/api/incidents/:id", get(detail))
        .route("/api/incidents/:id/postmortem", get(postmortem))
        .route("/api/resolve", post(resolve))
        .route("/api/replay", post(replay))
        .route("/api/repos", get(repos));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    HttpIncidentApi::new(&format!("http://{addr}"), Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn lists_incidents_with_lenient_fields() {
    let api = serve().await;
    // the third record has no id and is skipped without failing the page
    let incidents = api.list_incidents(20).await.expect("list");
    assert_eq!(incidents.len(), 2);

    let newest = &incidents[0];
    assert_eq!(newest.incident_id, "inc-2");
    assert_eq!(newest.status, IncidentStatus::WarRoomPosted);
    assert_eq!(newest.severity, Some(Severity::High));
    assert_eq!(newest.estimated_users_affected, 1200);
    assert!(newest.actions_log.is_empty());
    assert_eq!(newest.suspect_commits[0].sha, "a1b2c3d");

    assert_eq!(incidents[1].status, IncidentStatus::Unknown);
    assert_eq!(api.list_incidents(1).await.expect("list").len(), 1);
}

#[tokio::test]
async fn detail_and_not_found() {
    let api = serve().await;
    let incident = api.get_incident("inc-1").await.expect("detail");
    assert_eq!(incident.status, IncidentStatus::Resolved);

    let err = api.get_incident("nope").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::NotFound {
            detail: "Incident not found".into()
        }
    );
}

#[tokio::test]
async fn postmortem_pending_is_not_found() {
    let api = serve().await;
    let pm = api.get_postmortem("inc-1").await.expect("postmortem");
    assert_eq!(pm.s3_path.as_deref(), Some("s3://pm/inc-1.md"));

    let err = api.get_postmortem("inc-2").await.unwrap_err();
    assert_eq!(err.user_message(), "Postmortem not yet generated");
}

#[tokio::test]
async fn resolve_maps_error_bodies() {
    let api = serve().await;
    api.resolve("inc-1").await.expect("resolve");

    let missing = api.resolve("gone").await.unwrap_err();
    assert!(missing.is_not_found());

    // a non-string detail falls back to the status line
    let rejected = api.resolve("locked").await.unwrap_err();
    assert_eq!(
        rejected,
        ApiError::Rejected {
            status: 500,
            detail: "request failed with status 500".into()
        }
    );
}

#[tokio::test]
async fn replay_returns_new_incident_id() {
    let api = serve().await;
    let receipt = api.replay(&ReplayRequest::default()).await.expect("replay");
    assert_eq!(receipt.incident_id, "abc123");
    assert_eq!(receipt.status.as_deref(), Some("ingested"));

    let custom = ReplayRequest::custom("custom", json!({ "alert_title": "Disk full" }));
    let receipt = api.replay(&custom).await.expect("replay");
    assert_eq!(receipt.incident_id, "custom-1");
}

#[tokio::test]
async fn lists_connected_repos() {
    let api = serve().await;
    let repos = api.list_repos().await.expect("repos");
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].repo_id, "acme/payments");
    assert_eq!(repos[0].incident_count, 3);
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = HttpIncidentApi::new(&format!("http://{addr}"), Duration::from_secs(2)).expect("client");
    let err = api.list_incidents(20).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_) | ApiError::Timeout));
}
