// crates/core/src/lifecycle.rs
//! Project status transitions driven by job events.
//!
//! ```text
//! CREATED --index--> INDEXED <--reindex-- OUTDATED
//!    INDEXED | OUTDATED | ANSWERED --generation starts--> PROCESSING
//!    PROCESSING --completes--> ANSWERED
//!    PROCESSING --fails--> INDEXED
//!    ANSWERED --index_document--> OUTDATED
//! ```

use crate::error::TransitionError;
use crate::types::ProjectStatus;

/// Something a job did that may move a project's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectEvent {
    /// An indexing job finished. `reindex` is true when the whole corpus was
    /// rebuilt; `had_answers` when the project held answers beforehand.
    IndexCompleted { reindex: bool, had_answers: bool },
    GenerationStarted,
    GenerationCompleted,
    GenerationFailed,
}

impl ProjectEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectEvent::IndexCompleted { reindex: true, .. } => "reindex_completed",
            ProjectEvent::IndexCompleted { reindex: false, .. } => "index_completed",
            ProjectEvent::GenerationStarted => "generation_started",
            ProjectEvent::GenerationCompleted => "generation_completed",
            ProjectEvent::GenerationFailed => "generation_failed",
        }
    }
}

impl ProjectStatus {
    /// Compute the status after `event`, or reject the event.
    pub fn apply(self, event: ProjectEvent) -> Result<ProjectStatus, TransitionError> {
        use ProjectEvent::*;
        use ProjectStatus::*;

        let next = match (self, event) {
            (Processing, IndexCompleted { .. }) => None,
            (_, IndexCompleted { reindex: true, .. }) => Some(Indexed),
            (_, IndexCompleted { reindex: false, had_answers: true }) => Some(Outdated),
            (Created | Indexed, IndexCompleted { reindex: false, had_answers: false }) => {
                Some(Indexed)
            }
            (status, IndexCompleted { reindex: false, had_answers: false }) => Some(status),
            (Indexed | Outdated | Answered, GenerationStarted) => Some(Processing),
            (Processing, GenerationCompleted) => Some(Answered),
            (Processing, GenerationFailed) => Some(Indexed),
            _ => None,
        };

        next.ok_or(TransitionError {
            from: self,
            event: event.name(),
        })
    }

    /// Whether a generation job may be submitted for a project in this status.
    pub fn accepts_generation(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Indexed | ProjectStatus::Outdated | ProjectStatus::Answered
        )
    }

    /// The derived READY condition: indexed and nothing generating.
    pub fn is_ready(&self, generation_in_flight: bool) -> bool {
        *self == ProjectStatus::Indexed && !generation_in_flight
    }
}
