// crates/server/src/jobs/work.rs
//! What each job kind actually does.
//!
//! Every unit of work (one document, one answer) is committed to the project
//! store as it completes, so a failure part-way keeps what was already done.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use diligence_core::llm::LlmError;
use diligence_core::{
    chunk_document, parse_questionnaire, questions_from_inputs, AnswerGenerator, ChunkerConfig,
    Document, Project, ProjectEvent, QuestionInput, QuestionnaireError, Scope,
};
use diligence_search::{ChunkIndex, SearchError};
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::JobState;
use super::store::JobStore;
use super::types::JobKind;
use crate::projects::{apply_event, ProjectError, ProjectStore};

/// Why a job failed. The display text becomes the job's `error`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Questionnaire(#[from] QuestionnaireError),

    #[error("No data directory configured; supply the content inline")]
    NoDataDir,

    #[error("Cannot read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Document {0} contains no text")]
    EmptyDocument(String),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("Search index error: {0}")]
    Search(#[from] SearchError),

    #[error("Answer generation failed on question {order}: {source}")]
    Generation {
        order: u32,
        #[source]
        source: LlmError,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Settings shared by all job bodies.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Base directory for documents and questionnaires referenced by name.
    pub data_dir: Option<PathBuf>,
    /// Chunks retrieved per question.
    pub top_k: usize,
    pub chunker: ChunkerConfig,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            top_k: 3,
            chunker: ChunkerConfig::default(),
        }
    }
}

/// Everything a job body needs.
pub struct WorkContext {
    pub projects: Arc<ProjectStore>,
    pub index: Arc<ChunkIndex>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub settings: JobSettings,
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectPayload {
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub questionnaire: Option<String>,
    #[serde(default)]
    pub questionnaire_file: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<QuestionInput>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPayload {
    pub filename: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexAllPayload {
    pub documents: Vec<DocumentPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
}

/// A validated job payload.
#[derive(Debug, Clone)]
pub enum JobPlan {
    CreateProject(CreateProjectPayload),
    IndexDocument(DocumentPayload),
    IndexAll(IndexAllPayload),
    GenerateAnswers,
    UpdateProject(UpdateProjectPayload),
}

fn decode<T: serde::de::DeserializeOwned>(kind: JobKind, payload: &Value) -> Result<T, String> {
    let payload = if payload.is_null() { json!({}) } else { payload.clone() };
    serde_json::from_value(payload).map_err(|e| format!("{kind} payload: {e}"))
}

fn check_filename(name: &str) -> Result<(), String> {
    let path = Path::new(name);
    let plain = !name.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(format!("filename must be a plain relative path: {name:?}"))
    }
}

impl JobPlan {
    /// Validate the payload shape for `kind`.
    pub fn parse(kind: JobKind, payload: &Value) -> Result<Self, String> {
        if !(payload.is_object() || payload.is_null()) {
            return Err("payload must be a JSON object".into());
        }

        match kind {
            JobKind::CreateProject => {
                let p: CreateProjectPayload = decode(kind, payload)?;
                p.validate()?;
                Ok(JobPlan::CreateProject(p))
            }
            JobKind::IndexDocument => {
                let p: DocumentPayload = decode(kind, payload)?;
                check_filename(&p.filename)?;
                Ok(JobPlan::IndexDocument(p))
            }
            JobKind::IndexAll => {
                let p: IndexAllPayload = decode(kind, payload)?;
                if p.documents.is_empty() {
                    return Err("index_all needs at least one document".into());
                }
                let mut seen = HashSet::new();
                for doc in &p.documents {
                    check_filename(&doc.filename)?;
                    if !seen.insert(doc.filename.as_str()) {
                        return Err(format!("duplicate filename: {}", doc.filename));
                    }
                }
                Ok(JobPlan::IndexAll(p))
            }
            JobKind::GenerateAnswers => Ok(JobPlan::GenerateAnswers),
            JobKind::UpdateProject => {
                let p: UpdateProjectPayload = decode(kind, payload)?;
                if p.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                    return Err("name must not be empty".into());
                }
                Ok(JobPlan::UpdateProject(p))
            }
        }
    }
}

impl CreateProjectPayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        let sources = [
            self.questionnaire.is_some(),
            self.questionnaire_file.is_some(),
            self.questions.is_some(),
        ];
        if sources.iter().filter(|s| **s).count() != 1 {
            return Err(
                "exactly one of questionnaire, questionnaire_file or questions is required".into(),
            );
        }
        if let Some(file) = &self.questionnaire_file {
            check_filename(file)?;
        }
        Ok(())
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Reports progress for one job and writes it through to the store.
pub struct ProgressReporter {
    state: Arc<JobState>,
    store: Arc<JobStore>,
}

impl ProgressReporter {
    pub fn new(state: Arc<JobState>, store: Arc<JobStore>) -> Self {
        Self { state, store }
    }

    pub async fn report(&self, current: u64, total: u64, message: impl Into<String>) {
        if let Err(e) = self.state.report(current, total, Some(message.into())) {
            debug!(job_id = %self.state.id(), error = %e, "progress not recorded");
            return;
        }
        if let Err(e) = self.store.persist(&self.state).await {
            warn!(job_id = %self.state.id(), error = %e, "failed to persist job progress");
        }
    }
}

// ============================================================================
// Job bodies
// ============================================================================

async fn read_named_file(settings: &JobSettings, name: &str) -> Result<String, JobError> {
    let dir = settings.data_dir.as_ref().ok_or(JobError::NoDataDir)?;
    let path = dir.join(name);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| JobError::ReadFile {
            path: path.display().to_string(),
            source,
        })
}

/// Turn a create payload into a new project (not yet stored).
pub async fn build_project(
    payload: &CreateProjectPayload,
    settings: &JobSettings,
) -> Result<Project, JobError> {
    payload.validate().map_err(JobError::InvalidPayload)?;

    let questions = match (&payload.questionnaire, &payload.questionnaire_file, &payload.questions) {
        (Some(text), _, _) => parse_questionnaire(text)?,
        (_, Some(file), _) => parse_questionnaire(&read_named_file(settings, file).await?)?,
        (_, _, Some(inputs)) => questions_from_inputs(inputs)?,
        _ => return Err(JobError::Questionnaire(QuestionnaireError::NoQuestions)),
    };

    Ok(Project::new(payload.name.trim(), payload.scope, questions))
}

async fn load_document(
    settings: &JobSettings,
    payload: &DocumentPayload,
) -> Result<Document, JobError> {
    let content = match &payload.content {
        Some(content) => content.clone(),
        None => read_named_file(settings, &payload.filename).await?,
    };
    if content.trim().is_empty() {
        return Err(JobError::EmptyDocument(payload.filename.clone()));
    }
    Ok(chunked_document(
        uuid::Uuid::new_v4().to_string(),
        &payload.filename,
        content,
        settings.chunker,
    ))
}

fn chunked_document(id: String, filename: &str, content: String, chunker: ChunkerConfig) -> Document {
    let chunks = chunk_document(&id, &content, chunker);
    Document {
        id,
        filename: filename.to_string(),
        content,
        chunks,
        indexed_at: Utc::now(),
    }
}

/// Run a blocking search-index call off the async workers.
async fn with_index<T: Send + 'static>(
    index: &Arc<ChunkIndex>,
    f: impl FnOnce(&ChunkIndex) -> Result<T, SearchError> + Send + 'static,
) -> Result<T, JobError> {
    let index = Arc::clone(index);
    tokio::task::spawn_blocking(move || f(&index))
        .await
        .map_err(|e| JobError::Task(e.to_string()))?
        .map_err(JobError::from)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
    match detail {
        Some(detail) => format!("job panicked: {detail}"),
        None => "job panicked".to_string(),
    }
}

/// Await a job body, turning a panic into [`JobError::Task`].
pub async fn catch_panic<T>(
    body: impl Future<Output = Result<T, JobError>>,
) -> Result<T, JobError> {
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(JobError::Task(panic_message(payload.as_ref()))),
    }
}

fn chunk_total(documents: &[Document]) -> usize {
    documents.iter().map(|d| d.chunks.len()).sum()
}

pub async fn create_project(
    ctx: &WorkContext,
    payload: CreateProjectPayload,
    progress: &ProgressReporter,
) -> Result<Value, JobError> {
    progress.report(0, 1, "building questionnaire").await;
    let project = build_project(&payload, &ctx.settings).await?;
    let project_id = project.id.clone();
    let question_count = project.questions.len();
    ctx.projects
        .insert(project)
        .await
        .map_err(ProjectError::from)?;
    progress
        .report(1, 1, format!("created project with {question_count} questions"))
        .await;
    Ok(json!({ "project_id": project_id, "question_count": question_count }))
}

pub async fn index_document(
    ctx: &WorkContext,
    project_id: &str,
    payload: DocumentPayload,
    progress: &ProgressReporter,
) -> Result<Value, JobError> {
    progress.report(0, 1, format!("reading {}", payload.filename)).await;
    let document = load_document(&ctx.settings, &payload).await?;
    let document_id = document.id.clone();
    let chunk_count = document.chunks.len();

    let to_index = document.clone();
    let owner = project_id.to_string();
    with_index(&ctx.index, move |index| {
        index.index_document(&owner, &to_index)?;
        index.commit()
    })
    .await?;

    let registered = ctx
        .projects
        .update(project_id, |project| {
            let had_answers = project.has_answers();
            let replaced = project.add_document(document);
            apply_event(
                project,
                ProjectEvent::IndexCompleted {
                    reindex: false,
                    had_answers,
                },
            )?;
            Ok(replaced)
        })
        .await;

    let replaced = match registered {
        Ok(replaced) => replaced,
        Err(e) => {
            // The project never saw the document; take its chunks back out.
            let id = document_id.clone();
            if let Err(rollback) = with_index(&ctx.index, move |index| {
                index.delete_document(&id)?;
                index.commit()
            })
            .await
            {
                warn!(
                    %document_id,
                    error = %rollback,
                    "orphan chunks left in index after failed registration"
                );
            }
            return Err(e.into());
        }
    };

    if let Some(old_id) = replaced {
        with_index(&ctx.index, move |index| {
            index.delete_document(&old_id)?;
            index.commit()
        })
        .await?;
    }

    progress
        .report(1, 1, format!("indexed {} ({chunk_count} chunks)", payload.filename))
        .await;
    Ok(json!({ "document_id": document_id, "chunk_count": chunk_count }))
}

/// Replace the project's whole corpus and rebuild its chunks in the index.
async fn reindex(
    ctx: &WorkContext,
    project_id: &str,
    documents: Vec<Document>,
    progress: &ProgressReporter,
    total: u64,
) -> Result<usize, JobError> {
    let chunk_count = chunk_total(&documents);
    let to_index = documents.clone();
    let owner = project_id.to_string();
    with_index(&ctx.index, move |index| {
        index.delete_project(&owner)?;
        for document in &to_index {
            index.index_document(&owner, document)?;
        }
        index.commit()
    })
    .await?;

    ctx.projects
        .update(project_id, |project| {
            let had_answers = project.has_answers();
            project.replace_documents(documents);
            apply_event(
                project,
                ProjectEvent::IndexCompleted {
                    reindex: true,
                    had_answers,
                },
            )
        })
        .await?;

    progress
        .report(total, total, format!("index rebuilt ({chunk_count} chunks)"))
        .await;
    Ok(chunk_count)
}

pub async fn index_all(
    ctx: &WorkContext,
    project_id: &str,
    payload: IndexAllPayload,
    progress: &ProgressReporter,
) -> Result<Value, JobError> {
    let total = payload.documents.len() as u64;
    let mut documents = Vec::with_capacity(payload.documents.len());
    for (i, doc) in payload.documents.iter().enumerate() {
        documents.push(load_document(&ctx.settings, doc).await?);
        progress
            .report(i as u64 + 1, total, format!("prepared {}", doc.filename))
            .await;
    }

    let document_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    let chunk_count = reindex(ctx, project_id, documents, progress, total).await?;
    Ok(json!({ "document_ids": document_ids, "chunk_count": chunk_count }))
}

pub async fn update_project(
    ctx: &WorkContext,
    project_id: &str,
    payload: UpdateProjectPayload,
    progress: &ProgressReporter,
) -> Result<Value, JobError> {
    let stored = ctx
        .projects
        .update(project_id, |project| {
            if let Some(name) = &payload.name {
                project.name = name.trim().to_string();
            }
            if let Some(scope) = payload.scope {
                project.scope = scope;
            }
            Ok(project.documents.clone())
        })
        .await?;

    if stored.is_empty() {
        progress.report(1, 1, "metadata updated; no documents to re-index").await;
        return Ok(json!({ "document_count": 0, "chunk_count": 0 }));
    }

    let total = stored.len() as u64;
    let mut documents = Vec::with_capacity(stored.len());
    for (i, doc) in stored.into_iter().enumerate() {
        let filename = doc.filename.clone();
        documents.push(chunked_document(doc.id, &doc.filename, doc.content, ctx.settings.chunker));
        progress
            .report(i as u64 + 1, total, format!("re-chunked {filename}"))
            .await;
    }

    let document_count = documents.len();
    let chunk_count = reindex(ctx, project_id, documents, progress, total).await?;
    Ok(json!({ "document_count": document_count, "chunk_count": chunk_count }))
}

pub async fn generate_answers(
    ctx: &WorkContext,
    project_id: &str,
    progress: &ProgressReporter,
) -> Result<Value, JobError> {
    let project = ctx
        .projects
        .get(project_id)
        .await
        .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))?;
    ctx.projects
        .transition(project_id, ProjectEvent::GenerationStarted)
        .await?;

    let outcome = catch_panic(answer_questions(ctx, &project, progress)).await;
    let event = match outcome {
        Ok(_) => ProjectEvent::GenerationCompleted,
        Err(_) => ProjectEvent::GenerationFailed,
    };
    if let Err(e) = ctx.projects.transition(project_id, event).await {
        warn!(project_id, error = %e, "could not record end of generation");
        if outcome.is_ok() {
            return Err(e.into());
        }
    }

    let answers = outcome?;
    Ok(json!({ "answers": answers }))
}

async fn answer_questions(
    ctx: &WorkContext,
    project: &Project,
    progress: &ProgressReporter,
) -> Result<Vec<diligence_core::Answer>, JobError> {
    let questions = project.questions_in_order();
    let total = questions.len() as u64;
    let scope_filter = match project.scope {
        Scope::AllDocs => None,
        Scope::Specific => Some(project.id.clone()),
    };

    progress.report(0, total, "generating answers").await;
    let mut answers = Vec::with_capacity(questions.len());
    for (i, question) in questions.into_iter().enumerate() {
        let text = question.text.clone();
        let filter = scope_filter.clone();
        let top_k = ctx.settings.top_k;
        let context = with_index(&ctx.index, move |index| {
            index.search(&text, filter.as_deref(), top_k)
        })
        .await?;
        let generated = ctx
            .generator
            .generate(question, &context)
            .await
            .map_err(|source| JobError::Generation {
                order: question.order,
                source,
            })?;
        let answer = generated.into_answer(&question.id);

        let stored = answer.clone();
        ctx.projects
            .update(&project.id, move |p| {
                p.upsert_answer(stored);
                Ok(())
            })
            .await?;
        debug!(
            project_id = %project.id,
            question_id = %question.id,
            status = answer.status.as_str(),
            citations = answer.citations.len(),
            "answer stored"
        );
        answers.push(answer);

        progress
            .report(i as u64 + 1, total, format!("answered {}/{}", i + 1, total))
            .await;
    }

    info!(
        project_id = %project.id,
        generator = ctx.generator.name(),
        answers = answers.len(),
        "generation finished"
    );
    Ok(answers)
}

/// Dispatch a validated plan.
pub async fn run(
    ctx: &WorkContext,
    target_project_id: Option<&str>,
    plan: JobPlan,
    progress: &ProgressReporter,
) -> Result<Value, JobError> {
    let target = || {
        target_project_id
            .ok_or_else(|| JobError::InvalidPayload("missing target_project_id".into()))
    };
    match plan {
        JobPlan::CreateProject(p) => create_project(ctx, p, progress).await,
        JobPlan::IndexDocument(p) => index_document(ctx, target()?, p, progress).await,
        JobPlan::IndexAll(p) => index_all(ctx, target()?, p, progress).await,
        JobPlan::UpdateProject(p) => update_project(ctx, target()?, p, progress).await,
        JobPlan::GenerateAnswers => generate_answers(ctx, target()?, progress).await,
    }
}
