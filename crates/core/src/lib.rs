// crates/core/src/lib.rs
//! Domain model and pure logic for due-diligence questionnaire projects.
//!
//! Nothing in this crate touches the network listener, the database or the
//! job executor. It owns the project aggregate, the status lifecycle, and the
//! text processing used by indexing and answer generation.

pub mod answer;
pub mod chunker;
pub mod error;
pub mod evaluation;
pub mod lifecycle;
pub mod llm;
pub mod questionnaire;
pub mod types;

pub use answer::{AnswerGenerator, ExtractiveGenerator, GeneratedAnswer, LlmAnswerGenerator, RetrievedChunk};
pub use chunker::{chunk_document, split_text, ChunkerConfig};
pub use error::*;
pub use evaluation::{evaluate_project, EvaluationReport, EvaluationResult, EvaluationSummary};
pub use lifecycle::ProjectEvent;
pub use questionnaire::{parse_questionnaire, questions_from_inputs, QuestionInput};
pub use types::*;
