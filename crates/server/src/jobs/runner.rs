// crates/server/src/jobs/runner.rs
//! Central job runner: admits, records and executes jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use diligence_core::{ProjectEvent, ProjectStatus};
use diligence_db::DbError;
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::gate::{AdmissionGate, ProjectPermit};
use super::state::JobState;
use super::store::JobStore;
use super::types::{JobId, JobKind, JobRecord, JobView};
use super::work::{self, JobPlan, ProgressReporter, WorkContext};
use crate::metrics::{record_job_finished, record_job_rejected, record_job_submitted, InFlightGuard};

/// Why a submission was refused. Nothing is recorded for a refused job.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Invalid(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project {project_id} is busy with job {job_id} ({kind})")]
    Busy {
        project_id: String,
        job_id: JobId,
        kind: JobKind,
    },

    #[error("Failed to record job: {0}")]
    Database(#[from] DbError),
}

impl SubmitError {
    fn reason(&self) -> &'static str {
        match self {
            SubmitError::Invalid(_) => "validation",
            SubmitError::ProjectNotFound(_) => "not_found",
            SubmitError::Busy { .. } => "conflict",
            SubmitError::Database(_) => "storage",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: JobKind,
    pub target_project_id: Option<String>,
    pub payload: Value,
}

/// Central job runner.
///
/// `submit` validates and records a job, then spawns its work on the tokio
/// runtime and returns at once. Jobs for different projects run
/// concurrently; a project admits one job at a time.
pub struct JobRunner {
    store: Arc<JobStore>,
    gate: AdmissionGate,
    ctx: Arc<WorkContext>,
    tasks: Mutex<HashMap<JobId, AbortHandle>>,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, ctx: Arc<WorkContext>) -> Self {
        Self {
            store,
            gate: AdmissionGate::new(),
            ctx,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn context(&self) -> &Arc<WorkContext> {
        &self.ctx
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<JobId, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            tracing::error!("job task map lock poisoned");
            poisoned.into_inner()
        })
    }

    /// Whether an answer-generation job currently holds the project.
    pub fn generation_in_flight(&self, project_id: &str) -> bool {
        self.gate
            .holder(project_id)
            .is_some_and(|h| h.kind == JobKind::GenerateAnswers)
    }

    /// Validate, admit and record a job, then start it. The returned view is
    /// already readable through the store.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<JobView, SubmitError> {
        let kind = request.kind;
        let admitted = self.admit(&request).await;
        let (plan, permit) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                record_job_rejected(e.reason());
                return Err(e);
            }
        };

        let mut record = JobRecord::new(kind, request.target_project_id, request.payload);
        if let Some(permit) = &permit {
            record.id = permit.job_id().to_string();
        }
        let state = self.store.create(record).await?;
        record_job_submitted(kind);
        info!(
            job_id = %state.id(),
            kind = %kind,
            project_id = state.target_project_id().unwrap_or("-"),
            "job submitted"
        );

        let view = state.view();
        self.spawn(state, plan, permit);
        Ok(view)
    }

    async fn admit(
        &self,
        request: &SubmitRequest,
    ) -> Result<(JobPlan, Option<ProjectPermit>), SubmitError> {
        let kind = request.kind;
        let plan = JobPlan::parse(kind, &request.payload).map_err(SubmitError::Invalid)?;

        let project_id = match (kind.targets_project(), request.target_project_id.as_deref()) {
            (false, None) => return Ok((plan, None)),
            (false, Some(_)) => {
                return Err(SubmitError::Invalid(format!(
                    "{kind} does not take a target_project_id"
                )))
            }
            (true, None) => {
                return Err(SubmitError::Invalid(format!("{kind} requires target_project_id")))
            }
            (true, Some(id)) => id,
        };

        if !self.ctx.projects.contains(project_id).await {
            return Err(SubmitError::ProjectNotFound(project_id.to_string()));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let permit = self
            .gate
            .try_acquire(project_id, &job_id, kind)
            .map_err(|holder| SubmitError::Busy {
                project_id: project_id.to_string(),
                job_id: holder.job_id,
                kind: holder.kind,
            })?;

        // Checked under the permit so no other job can move the status.
        if kind == JobKind::GenerateAnswers {
            let status = self
                .ctx
                .projects
                .get(project_id)
                .await
                .map(|p| p.status)
                .ok_or_else(|| SubmitError::ProjectNotFound(project_id.to_string()))?;
            if !status.accepts_generation() {
                return Err(SubmitError::Invalid(generation_refusal(project_id, status)));
            }
        }

        Ok((plan, Some(permit)))
    }

    fn spawn(self: &Arc<Self>, state: Arc<JobState>, plan: JobPlan, permit: Option<ProjectPermit>) {
        let runner = Arc::clone(self);
        let job_id = state.id().to_string();
        // Held across spawn + insert so the task cannot deregister first.
        let mut tasks = self.tasks();
        let handle = tokio::spawn(async move {
            runner.execute(state, plan, permit).await;
        });
        tasks.insert(job_id, handle.abort_handle());
    }

    async fn execute(&self, state: Arc<JobState>, plan: JobPlan, permit: Option<ProjectPermit>) {
        let _in_flight = InFlightGuard::new();
        let kind = state.kind();
        let started = Instant::now();

        if let Err(e) = state.start() {
            debug!(job_id = %state.id(), error = %e, "job not started");
            self.finish_task(state.id());
            return;
        }
        self.persist(&state).await;

        let reporter = ProgressReporter::new(Arc::clone(&state), Arc::clone(&self.store));
        let outcome = work::catch_panic(work::run(
            &self.ctx,
            state.target_project_id(),
            plan,
            &reporter,
        ))
        .await;
        // Project writes are done; free it before the terminal view goes out.
        drop(permit);

        let written = match outcome {
            Ok(result) => state.complete(result),
            Err(e) => {
                warn!(job_id = %state.id(), kind = %kind, error = %e, "job failed");
                state.fail(e.to_string())
            }
        };
        match written {
            Ok(record) => {
                self.persist(&state).await;
                record_job_finished(kind, record.status, Some(started.elapsed()));
                info!(
                    job_id = %state.id(),
                    kind = %kind,
                    status = %record.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job finished"
                );
            }
            Err(e) => debug!(job_id = %state.id(), error = %e, "job already terminal"),
        }
        self.finish_task(state.id());
    }

    async fn persist(&self, state: &JobState) {
        if let Err(e) = self.store.persist(state).await {
            warn!(job_id = %state.id(), error = %e, "failed to persist job record");
        }
    }

    fn finish_task(&self, job_id: &str) {
        self.tasks().remove(job_id);
    }

    /// Stop a job's task if it is still running. Its permit is released as
    /// the task is dropped.
    pub fn abort(&self, job_id: &str) -> bool {
        match self.tasks().remove(job_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Fail a job from outside its task (janitor). Returns false when the
    /// job was already terminal.
    ///
    /// `project_event` is applied to the target project before the job's
    /// admission slot is released, so the next admitted job never sees the
    /// failed job's status.
    pub async fn fail_job(
        &self,
        state: &JobState,
        error: &str,
        project_event: Option<ProjectEvent>,
    ) -> bool {
        if state.status().is_terminal() {
            return false;
        }
        let project_id = state.target_project_id();
        if let (Some(project_id), Some(event)) = (project_id, project_event) {
            if let Err(e) = self.ctx.projects.transition(project_id, event).await {
                debug!(project_id, job_id = %state.id(), error = %e, "project not reverted");
            }
        }
        self.abort(state.id());
        if let Some(project_id) = project_id {
            self.gate.release(project_id, state.id());
        }
        match state.fail(error) {
            Ok(record) => {
                self.persist(state).await;
                record_job_finished(state.kind(), record.status, None);
                true
            }
            Err(_) => false,
        }
    }
}

fn generation_refusal(project_id: &str, status: ProjectStatus) -> String {
    match status {
        ProjectStatus::Created => {
            format!("project {project_id} has no indexed documents; index documents before generating answers")
        }
        status => format!("project {project_id} cannot start generation while {status}"),
    }
}
