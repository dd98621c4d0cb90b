// crates/core/src/types.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::evaluation::EvaluationReport;

/// Lifecycle status of a project.
///
/// `READY` is not a stored status; it is derived from `Indexed` plus the
/// absence of an in-flight generation job (see [`ProjectStatus::is_ready`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Created,
    Indexed,
    Outdated,
    Processing,
    Answered,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "CREATED",
            ProjectStatus::Indexed => "INDEXED",
            ProjectStatus::Outdated => "OUTDATED",
            ProjectStatus::Processing => "PROCESSING",
            ProjectStatus::Answered => "ANSWERED",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which documents answer generation may draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Retrieve from every indexed document across all projects.
    #[default]
    AllDocs,
    /// Retrieve only from documents registered on this project.
    Specific,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub section: String,
    pub order: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerStatus {
    Generated,
    Confirmed,
    Rejected,
    ManualUpdated,
    MissingData,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Generated => "GENERATED",
            AnswerStatus::Confirmed => "CONFIRMED",
            AnswerStatus::Rejected => "REJECTED",
            AnswerStatus::ManualUpdated => "MANUAL_UPDATED",
            AnswerStatus::MissingData => "MISSING_DATA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub chunk_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: String,
    pub question_id: String,
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub confidence_score: f64,
    pub status: AnswerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_answer: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Answer {
    /// The text a reviewer would see: the manual override when present.
    pub fn effective_text(&self) -> &str {
        self.manual_answer.as_deref().unwrap_or(&self.answer_text)
    }

    /// Apply a reviewer decision to this answer.
    ///
    /// `GENERATED` is reserved for the executor and `MANUAL_UPDATED` needs the
    /// replacement text.
    pub fn apply_review(
        &mut self,
        status: AnswerStatus,
        manual_answer: Option<String>,
    ) -> Result<(), ReviewError> {
        match status {
            AnswerStatus::Generated => return Err(ReviewError::ReservedStatus(status.as_str())),
            AnswerStatus::ManualUpdated => {
                let text = manual_answer
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(ReviewError::MissingManualAnswer)?;
                self.manual_answer = Some(text);
            }
            _ => {
                if let Some(text) = manual_answer.filter(|t| !t.trim().is_empty()) {
                    self.manual_answer = Some(text);
                }
            }
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub index: u32,
    pub text: String,
}

/// A document registered on a project, including its text and chunks.
///
/// The content is kept so the corpus can be re-indexed without a re-upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub chunks: Vec<Chunk>,
    pub indexed_at: DateTime<Utc>,
}

/// The public face of a [`Document`]: no content, no chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

impl From<&Document> for DocumentRef {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            chunk_count: doc.chunks.len(),
            indexed_at: doc.indexed_at,
        }
    }
}

/// The project aggregate: questionnaire, corpus, answers and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub scope: Scope,
    pub status: ProjectStatus,
    pub questions: Vec<Question>,
    /// Keyed by question id; at most one answer per question.
    pub answers: BTreeMap<String, Answer>,
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, scope: Scope, questions: Vec<Question>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            scope,
            status: ProjectStatus::Created,
            questions,
            answers: BTreeMap::new(),
            documents: Vec::new(),
            evaluation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_answers(&self) -> bool {
        !self.answers.is_empty()
    }

    pub fn questions_in_order(&self) -> Vec<&Question> {
        let mut questions: Vec<&Question> = self.questions.iter().collect();
        questions.sort_by_key(|q| q.order);
        questions
    }

    /// Insert or overwrite the answer for its question.
    pub fn upsert_answer(&mut self, answer: Answer) {
        self.answers.insert(answer.question_id.clone(), answer);
        self.touch();
    }

    pub fn answer_mut_by_id(&mut self, answer_id: &str) -> Option<&mut Answer> {
        self.answers.values_mut().find(|a| a.id == answer_id)
    }

    /// Register a document, replacing an earlier one with the same filename.
    ///
    /// Returns the id of the replaced document, if any, so callers can drop
    /// its chunks from the search index.
    pub fn add_document(&mut self, document: Document) -> Option<String> {
        let replaced = self
            .documents
            .iter()
            .position(|d| d.filename == document.filename)
            .map(|idx| self.documents.remove(idx).id);
        self.documents.push(document);
        self.touch();
        replaced
    }

    /// Swap the whole corpus, returning the documents that were dropped.
    pub fn replace_documents(&mut self, documents: Vec<Document>) -> Vec<Document> {
        let old = std::mem::replace(&mut self.documents, documents);
        self.touch();
        old
    }

    pub fn document_refs(&self) -> Vec<DocumentRef> {
        self.documents.iter().map(DocumentRef::from).collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
