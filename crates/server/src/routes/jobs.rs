// crates/server/src/routes/jobs.rs
//! Job submission and tracking.
//!
//! - POST /jobs - Submit a job; returns its request id at once
//! - GET /jobs - List jobs, optionally filtered by `?status=`
//! - GET /jobs/{request_id} - Current view of one job
//! - GET /jobs/{request_id}/stream - SSE stream of the job's views

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt;

use crate::error::{ApiError, ApiResult};
use crate::jobs::{progress_stream, JobKind, JobStatus, JobView, SubmitRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    pub kind: String,
    #[serde(default)]
    pub target_project_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /jobs - Validate, record and start a job.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitJobBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(body) = body?;
    let kind: JobKind = body.kind.parse().map_err(ApiError::Validation)?;

    let view = state
        .runner
        .submit(SubmitRequest {
            kind,
            target_project_id: body.target_project_id,
            payload: body.payload,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            request_id: view.request_id,
        }),
    ))
}

/// GET /jobs - All tracked jobs, oldest first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<JobView>>> {
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::Validation)?;
    Ok(Json(state.jobs.list(status)))
}

/// GET /jobs/{request_id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = state
        .jobs
        .get(&request_id)
        .ok_or(ApiError::JobNotFound(request_id))?;
    Ok(Json(job.view()))
}

/// GET /jobs/{request_id}/stream - The current view, then each change, then
/// the terminal view. Each event is named after the job's status.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = state
        .jobs
        .get(&request_id)
        .ok_or(ApiError::JobNotFound(request_id))?;

    let stream = async_stream::stream! {
        let updates = progress_stream(job);
        tokio::pin!(updates);
        while let Some(view) = updates.next().await {
            match Event::default().event(view.status.as_str()).json_data(&view) {
                Ok(event) => yield Ok(event),
                Err(e) => {
                    tracing::warn!(
                        job_id = %view.request_id,
                        error = %e,
                        "skipping progress event that failed to serialize"
                    );
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{request_id}", get(get_job))
        .route("/jobs/{request_id}/stream", get(stream_job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use diligence_db::Database;
    use tower::ServiceExt;

    async fn app() -> (Arc<AppState>, Router) {
        let db = Database::new_in_memory().await.unwrap();
        let state = AppState::new(db).await.unwrap();
        let app = Router::new().merge(router()).with_state(Arc::clone(&state));
        (state, app)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_201_and_job_is_readable() {
        let (_state, app) = app().await;
        let (status, body) = send(
            app.clone(),
            post_json(
                "/jobs",
                serde_json::json!({
                    "kind": "create_project",
                    "payload": {"name": "Fund", "questions": [{"text": "Who audits the fund?"}]}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["request_id"].as_str().unwrap().to_string();

        let (status, view) = send(
            app,
            Request::builder().uri(format!("/jobs/{id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["request_id"], id.as_str());
        assert_eq!(view["kind"], "create_project");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_400() {
        let (state, app) = app().await;
        let (status, body) = send(
            app,
            post_json("/jobs", serde_json::json!({"kind": "reindex_everything", "payload": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert!(state.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let (_state, app) = app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad request");
    }

    #[tokio::test]
    async fn test_stream_events_carry_json_views() {
        let (state, app) = app().await;
        let (_, body) = send(
            app.clone(),
            post_json(
                "/jobs",
                serde_json::json!({
                    "kind": "create_project",
                    "payload": {"name": "Fund", "questions": [{"text": "Who audits the fund?"}]}
                }),
            ),
        )
        .await;
        let id = body["request_id"].as_str().unwrap().to_string();
        let job = state.jobs.get(&id).unwrap();
        for _ in 0..200 {
            if job.status().is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let response = app
            .oneshot(Request::builder().uri(format!("/jobs/{id}/stream")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains("event: completed"), "{text}");
        let data: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|json| serde_json::from_str(json.trim()).unwrap())
            .collect();
        assert_eq!(data.len(), 1, "{text}");
        assert_eq!(data[0]["request_id"], id.as_str());
        assert_eq!(data[0]["status"], "completed");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (_state, app) = app().await;
        for uri in ["/jobs/missing", "/jobs/missing/stream"] {
            let (status, body) = send(
                app.clone(),
                Request::builder().uri(uri).body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["error"], "Job not found");
        }
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status() {
        let (_state, app) = app().await;
        let (status, _) = send(
            app.clone(),
            Request::builder().uri("/jobs?status=done").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            app,
            Request::builder().uri("/jobs?status=pending").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
