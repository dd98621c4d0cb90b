// crates/server/src/lib.rs
//! Diligence server library.
//!
//! Axum HTTP service that accepts questionnaire jobs (project creation,
//! document indexing, answer generation), runs them in the background and
//! reports their progress by polling or server-sent events.

pub mod config;
pub mod error;
pub mod janitor;
pub mod jobs;
pub mod metrics;
pub mod projects;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::*;
pub use metrics::init_metrics;
pub use routes::api_routes;
pub use state::{AppState, StartupError};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, metrics, jobs, projects)
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
