// crates/server/src/routes/projects.rs
//! Project endpoints.
//!
//! - GET  /projects - Project summaries
//! - POST /projects - Create a project synchronously
//! - GET  /projects/{id} - Full project with ordered questions and answers
//! - GET  /projects/{id}/status - Stored status plus derived readiness
//! - POST /projects/{id}/answers - Reviewer update of one answer
//! - POST /projects/{id}/evaluate - Score answers against ground truth
//! - GET  /projects/{id}/evaluation - Last evaluation report

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diligence_core::{
    evaluate_project, Answer, AnswerStatus, DocumentRef, EvaluationReport, Project,
    ProjectStatus, Question, Scope,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::jobs::work::{build_project, CreateProjectPayload};
use crate::projects::ProjectError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub scope: Scope,
    pub status: ProjectStatus,
    pub ready: bool,
    pub question_count: usize,
    pub answer_count: usize,
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub scope: Scope,
    pub status: ProjectStatus,
    pub ready: bool,
    pub questions: Vec<Question>,
    /// In question order.
    pub answers: Vec<Answer>,
    pub documents: Vec<DocumentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProjectStatusResponse {
    pub status: ProjectStatus,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateProjectResponse {
    pub project_id: String,
    pub question_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAnswerBody {
    pub answer_id: String,
    pub status: AnswerStatus,
    #[serde(default)]
    pub manual_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateBody {
    /// Expected answer text keyed by question id.
    pub ground_truth: HashMap<String, String>,
}

fn is_ready(state: &AppState, project: &Project) -> bool {
    project
        .status
        .is_ready(state.runner.generation_in_flight(&project.id))
}

fn summarize(state: &AppState, project: &Project) -> ProjectSummary {
    ProjectSummary {
        id: project.id.clone(),
        name: project.name.clone(),
        scope: project.scope,
        status: project.status,
        ready: is_ready(state, project),
        question_count: project.questions.len(),
        answer_count: project.answers.len(),
        document_count: project.documents.len(),
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

fn project_view(state: &AppState, project: Project) -> ProjectView {
    let ready = is_ready(state, &project);
    let questions: Vec<Question> = project.questions_in_order().into_iter().cloned().collect();
    let answers = questions
        .iter()
        .filter_map(|q| project.answers.get(&q.id).cloned())
        .collect();
    ProjectView {
        documents: project.document_refs(),
        id: project.id,
        name: project.name,
        scope: project.scope,
        status: project.status,
        ready,
        questions,
        answers,
        evaluation: project.evaluation,
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

async fn load(state: &AppState, id: &str) -> ApiResult<Project> {
    state
        .projects
        .get(id)
        .await
        .ok_or_else(|| ApiError::ProjectNotFound(id.to_string()))
}

/// GET /projects
async fn list_projects(State(state): State<Arc<AppState>>) -> Json<Vec<ProjectSummary>> {
    let projects = state.projects.list().await;
    Json(projects.iter().map(|p| summarize(&state, p)).collect())
}

/// POST /projects - Same payload as a `create_project` job, applied inline.
async fn create_project(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateProjectPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateProjectResponse>)> {
    let Json(payload) = body?;
    let project = build_project(&payload, &state.runner.context().settings).await?;
    let response = CreateProjectResponse {
        project_id: project.id.clone(),
        question_count: project.questions.len(),
    };
    state.projects.insert(project).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /projects/{id}
async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectView>> {
    let project = load(&state, &id).await?;
    Ok(Json(project_view(&state, project)))
}

/// GET /projects/{id}/status
async fn get_project_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectStatusResponse>> {
    let project = load(&state, &id).await?;
    Ok(Json(ProjectStatusResponse {
        status: project.status,
        ready: is_ready(&state, &project),
    }))
}

/// POST /projects/{id}/answers - Confirm, reject or override one answer.
async fn update_answer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<UpdateAnswerBody>, JsonRejection>,
) -> ApiResult<Json<Answer>> {
    let Json(body) = body?;
    let answer = state
        .projects
        .update(&id, |project| {
            let answer = project
                .answer_mut_by_id(&body.answer_id)
                .ok_or_else(|| ProjectError::AnswerNotFound(body.answer_id.clone()))?;
            answer.apply_review(body.status, body.manual_answer.clone())?;
            Ok(answer.clone())
        })
        .await?;
    tracing::info!(
        project_id = %id,
        answer_id = %answer.id,
        status = answer.status.as_str(),
        "answer reviewed"
    );
    Ok(Json(answer))
}

/// POST /projects/{id}/evaluate - Score and store the report.
async fn evaluate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<EvaluateBody>, JsonRejection>,
) -> ApiResult<Json<EvaluationReport>> {
    let Json(body) = body?;
    let report = state
        .projects
        .update(&id, |project| {
            let report = evaluate_project(project, &body.ground_truth)?;
            project.evaluation = Some(report.clone());
            Ok(report)
        })
        .await?;
    tracing::info!(
        project_id = %id,
        evaluated = report.summary.evaluated_questions,
        overall = report.summary.average_overall_score,
        "project evaluated"
    );
    Ok(Json(report))
}

/// GET /projects/{id}/evaluation
async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<EvaluationReport>> {
    let project = load(&state, &id).await?;
    project
        .evaluation
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Project {id} has not been evaluated")))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{id}", get(get_project))
        .route("/projects/{id}/status", get(get_project_status))
        .route("/projects/{id}/answers", post(update_answer))
        .route("/projects/{id}/evaluate", post(evaluate))
        .route("/projects/{id}/evaluation", get(get_evaluation))
}
