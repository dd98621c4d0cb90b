// crates/server/src/jobs/types.rs
//! Types for the background job system.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diligence_db::JobRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque job identifier (UUID v4 string), also exposed as `request_id`.
pub type JobId = String;

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CreateProject,
    IndexDocument,
    IndexAll,
    GenerateAnswers,
    UpdateProject,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CreateProject => "create_project",
            JobKind::IndexDocument => "index_document",
            JobKind::IndexAll => "index_all",
            JobKind::GenerateAnswers => "generate_answers",
            JobKind::UpdateProject => "update_project",
        }
    }

    /// Every kind except `create_project` works on an existing project.
    pub fn targets_project(&self) -> bool {
        !matches!(self, JobKind::CreateProject)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_project" => Ok(JobKind::CreateProject),
            "index_document" => Ok(JobKind::IndexDocument),
            "index_all" => Ok(JobKind::IndexAll),
            "generate_answers" => Ok(JobKind::GenerateAnswers),
            "update_project" => Ok(JobKind::UpdateProject),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Status of a background job. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `pending -> in_progress -> completed | failed`; a pending job may also
    /// fail directly (restart, janitor).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub current: u64,
    /// Zero until the job knows how many units it will process.
    pub total: u64,
    pub message: Option<String>,
}

/// The authoritative record of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub target_project_id: Option<String>,
    pub payload: Value,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(kind: JobKind, target_project_id: Option<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target_project_id,
            payload,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_row(&self) -> Result<JobRow, serde_json::Error> {
        Ok(JobRow {
            id: self.id.clone(),
            kind: self.kind.as_str().to_string(),
            status: self.status.as_str().to_string(),
            target_project_id: self.target_project_id.clone(),
            payload: serde_json::to_string(&self.payload)?,
            progress_current: self.progress.current as i64,
            progress_total: self.progress.total as i64,
            progress_message: self.progress.message.clone(),
            result: self.result.as_ref().map(serde_json::to_string).transpose()?,
            error: self.error.clone(),
            created_at: self.created_at.timestamp_millis(),
            updated_at: self.updated_at.timestamp_millis(),
        })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let timestamp = |ms: i64| {
            DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("bad timestamp {ms}"))
        };
        let json = |text: &str| serde_json::from_str::<Value>(text).map_err(|e| e.to_string());

        Ok(Self {
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            target_project_id: row.target_project_id,
            payload: json(&row.payload)?,
            progress: JobProgress {
                current: row.progress_current.max(0) as u64,
                total: row.progress_total.max(0) as u64,
                message: row.progress_message,
            },
            result: row.result.as_deref().map(json).transpose()?,
            error: row.error,
            created_at: timestamp(row.created_at)?,
            updated_at: timestamp(row.updated_at)?,
            id: row.id,
        })
    }
}

/// Wire view of a job, returned by status reads and progress streams.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobView {
    pub request_id: JobId,
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_project_id: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobView {
    fn from(record: &JobRecord) -> Self {
        // Counters are reported once the job has sized its work.
        let sized = record.progress.total > 0;
        Self {
            request_id: record.id.clone(),
            kind: record.kind,
            target_project_id: record.target_project_id.clone(),
            status: record.status,
            current: sized.then_some(record.progress.current),
            total: sized.then_some(record.progress.total),
            message: record.progress.message.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
