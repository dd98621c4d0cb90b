//! API route handlers for the diligence server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod projects;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router.
///
/// Routes:
/// - GET  /health - Health check
/// - GET  /metrics - Prometheus metrics
/// - POST /jobs - Submit a job
/// - GET  /jobs - List jobs (`?status=`)
/// - GET  /jobs/{request_id} - Job status
/// - GET  /jobs/{request_id}/stream - SSE stream of job progress
/// - GET  /projects - Project summaries
/// - POST /projects - Create a project synchronously
/// - GET  /projects/{id} - Full project
/// - GET  /projects/{id}/status - Status and readiness
/// - POST /projects/{id}/answers - Review one answer
/// - POST /projects/{id}/evaluate - Evaluate against ground truth
/// - GET  /projects/{id}/evaluation - Last evaluation report
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(jobs::router())
        .merge(projects::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_routes_creation() {
        let db = diligence_db::Database::new_in_memory().await.expect("in-memory DB");
        let state = AppState::new(db).await.expect("state");
        let _router = api_routes(state);
    }
}
