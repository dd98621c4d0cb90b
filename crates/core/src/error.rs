// crates/core/src/error.rs
use thiserror::Error;

use crate::types::ProjectStatus;

/// Errors from turning questionnaire input into questions.
#[derive(Debug, Error)]
pub enum QuestionnaireError {
    #[error("No questions found in questionnaire")]
    NoQuestions,

    #[error("Question {index} has empty text")]
    EmptyQuestion { index: usize },
}

/// A project event that is not valid from the current status.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Cannot apply {event} while project is {from}")]
pub struct TransitionError {
    pub from: ProjectStatus,
    pub event: &'static str,
}

/// A reviewer update that cannot be applied to an answer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReviewError {
    #[error("Status {0} is reserved for generated answers")]
    ReservedStatus(&'static str),

    #[error("MANUAL_UPDATED requires a non-empty manual_answer")]
    MissingManualAnswer,
}

/// Errors from scoring answers against ground truth.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("Project has no answers to evaluate")]
    NoAnswers,

    #[error("Ground truth matches none of the project's questions")]
    NoGroundTruth,
}
