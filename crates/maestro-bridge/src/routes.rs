// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::state::BridgeState;

/// The full HTTP surface.  Contract: nothing here blocks the event loop —
/// sampling-loop runs are spawned onto the runtime, and all dashboard file
/// I/O goes through `spawn_blocking`.
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/messages", post(post_message))
        .route("/api/stop", post(post_stop))
        .route("/api/stream", get(stream))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/new", post(new_session))
        .route("/api/sessions/:id/switch", post(switch_session))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/api/dashboard/tasks", get(dashboard_tasks))
        .route("/api/dashboard/knowledge", get(dashboard_knowledge))
        .route("/api/dashboard/docs", get(dashboard_docs))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

/// Accept a user message and schedule the sampling loop; the response
/// returns immediately with the current state.  A second message while a
/// run is active is a 409 until the run completes or is stopped.
async fn post_message(
    State(state): State<Arc<BridgeState>>,
    Json(body): Json<MessageBody>,
) -> impl IntoResponse {
    let session = match state.current_session() {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    if session.is_running() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a run is already active; stop it or wait" })),
        );
    }

    let orchestrator = state.orchestrator.clone();
    let session_for_run = session.clone();
    let message = body.message;
    tokio::spawn(async move {
        let outcome = orchestrator.handle_task(session_for_run, &message).await;
        info!(status = outcome.status.as_str(), "run finished");
    });

    // Give the spawned run a beat to flip the running flag so the snapshot
    // the client gets back reflects it; correctness does not depend on it.
    tokio::task::yield_now().await;
    (
        StatusCode::OK,
        Json(json!({
            "messages": session.snapshot()["messages"],
            "running": session.is_running(),
        })),
    )
}

/// Idempotent cancellation request.
async fn post_stop(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    match state.current_session() {
        Ok(session) => {
            session.request_stop();
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Err(e) => internal_error(e),
    }
}

/// Server-sent events: one `data:` frame per state change plus periodic
/// keepalive comments.  The subscriber queue is bounded with drop-oldest
/// semantics; disconnecting drops the receiver and removes the subscriber.
async fn stream(
    State(state): State<Arc<BridgeState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let session = state
        .current_session()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut rx = session.subscribe();
    let initial = session.snapshot().to_string();
    let keepalive_secs = state.config.bridge.keepalive_secs;

    let stream = async_stream::stream! {
        yield Ok(Event::default().data(initial));
        loop {
            match rx.recv().await {
                Ok(frame) => yield Ok(Event::default().data(frame)),
                // Lagged: the queue overflowed and old frames were dropped;
                // newer state is still coming, so keep reading.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(keepalive_secs))
            .text("keepalive"),
    ))
}

async fn list_sessions(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let result =
        tokio::task::spawn_blocking(move || state.list_sessions()).await;
    match result {
        Ok(Ok(sessions)) => (StatusCode::OK, Json(json!(sessions))),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(anyhow::anyhow!(e)),
    }
}

async fn new_session(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let result = tokio::task::spawn_blocking(move || {
        let id = state.create_session()?;
        state.switch_session(&id)?;
        Ok::<_, anyhow::Error>(id)
    })
    .await;
    match result {
        Ok(Ok(id)) => (StatusCode::OK, Json(json!({ "id": id }))),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(anyhow::anyhow!(e)),
    }
}

async fn switch_session(
    State(state): State<Arc<BridgeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.switch_session(&id) {
        Ok(()) => (StatusCode::OK, Json(json!({ "id": id }))),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))),
    }
}

async fn delete_session(
    State(state): State<Arc<BridgeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = tokio::task::spawn_blocking(move || state.delete_session(&id)).await;
    match result {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "success": true }))),
        Ok(Err(e)) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))),
        Err(e) => internal_error(anyhow::anyhow!(e)),
    }
}

#[derive(Deserialize)]
struct ProjectQuery {
    #[serde(default = "default_project")]
    project: String,
    #[serde(default)]
    q: String,
}

fn default_project() -> String {
    "default".into()
}

/// Task browsing: list plus aggregated counts, off the event loop.
async fn dashboard_tasks(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<ProjectQuery>,
) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || {
        let tasks = orchestrator.tasks().list(&query.project)?;
        let summary = orchestrator.tasks().summary(&query.project)?;
        Ok::<_, anyhow::Error>(json!({ "tasks": tasks, "summary": summary }))
    })
    .await;
    match result {
        Ok(Ok(body)) => (StatusCode::OK, Json(body)),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(anyhow::anyhow!(e)),
    }
}

/// Knowledge browsing/search, off the event loop.
async fn dashboard_knowledge(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<ProjectQuery>,
) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || {
        let knowledge = orchestrator.knowledge();
        let entries = if query.q.is_empty() {
            knowledge.list(&query.project)?
        } else {
            knowledge.search(&query.project, &query.q, 10)?
        };
        let summary = knowledge.summary(&query.project)?;
        Ok::<_, anyhow::Error>(json!({ "entries": entries, "summary": summary }))
    })
    .await;
    match result {
        Ok(Ok(body)) => (StatusCode::OK, Json(body)),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(anyhow::anyhow!(e)),
    }
}

/// Planning documents the orchestrator wrote for strategic tasks.
async fn dashboard_docs(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<ProjectQuery>,
) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || {
        let docs_dir = orchestrator
            .tasks()
            .projects_root()
            .join(&query.project)
            .join(".planning")
            .join("docs");
        let mut docs = Vec::new();
        if docs_dir.is_dir() {
            let mut paths: Vec<_> = std::fs::read_dir(&docs_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("md"))
                .collect();
            paths.sort();
            for path in paths {
                let name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
                let content = std::fs::read_to_string(&path).unwrap_or_default();
                docs.push(json!({ "name": name, "content": content }));
            }
        }
        Ok::<_, anyhow::Error>(json!({ "docs": docs }))
    })
    .await;
    match result {
        Ok(Ok(body)) => (StatusCode::OK, Json(body)),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(anyhow::anyhow!(e)),
    }
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::state::tests::test_state;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn message_schedules_run_and_returns_state() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let app = router(state.clone());
        let response = app
            .oneshot(
                Request::post("/api/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.get("running").is_some());

        // Wait for the spawned run to complete, then check the transcript.
        let session = state.current_session().unwrap();
        for _ in 0..200 {
            if !session.is_running() && session.message_count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(session.message_count() >= 2);
    }

    #[tokio::test]
    async fn second_message_while_running_is_409() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let session = state.current_session().unwrap();
        // Pin the running flag without an actual run.
        assert!(session.try_begin_run());

        let app = router(state.clone());
        let response = app
            .oneshot(
                Request::post("/api/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        session.end_run(maestro_core::RunStatus::Completed, None);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::post("/api/stop").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["success"], true);
        }
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let app = router(state.clone());

        let created = app
            .clone()
            .oneshot(Request::post("/api/sessions/new").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        let id = body_json(created).await["id"].as_str().unwrap().to_string();
        assert_eq!(state.current_id(), id);

        let listed = app
            .clone()
            .oneshot(Request::get("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let sessions = body_json(listed).await;
        assert_eq!(sessions.as_array().unwrap().len(), 2);

        let deleted = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);
        assert_ne!(state.current_id(), id);
    }

    #[tokio::test]
    async fn switch_to_unknown_session_is_404() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        let response = app
            .oneshot(
                Request::post("/api/sessions/bogus/switch")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dashboard_endpoints_answer_json() {
        let tmp = TempDir::new().unwrap();
        let app = router(test_state(&tmp));
        let tasks = app
            .clone()
            .oneshot(
                Request::get("/api/dashboard/tasks?project=demo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(tasks.status(), StatusCode::OK);
        let body = body_json(tasks).await;
        assert!(body.get("summary").is_some());

        let knowledge = app
            .oneshot(
                Request::get("/api/dashboard/knowledge?project=demo&q=deploy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(knowledge.status(), StatusCode::OK);
    }
}
