// crates/core/src/evaluation.rs
//! Scoring generated answers against ground-truth answers.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::error::EvaluationError;
use crate::types::{Answer, Project};

const ACCURACY_WEIGHT: f64 = 0.5;
const CITATION_WEIGHT: f64 = 0.3;
const CORRELATION_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub question_id: String,
    pub answer_id: String,
    pub ai_answer: String,
    pub ground_truth_answer: String,
    pub accuracy_score: f64,
    pub citation_quality_score: f64,
    pub confidence_correlation_score: f64,
    pub overall_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_questions: usize,
    pub evaluated_questions: usize,
    pub average_accuracy: f64,
    pub average_citation_quality: f64,
    pub average_confidence_correlation: f64,
    pub average_overall_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub project_id: String,
    pub results: Vec<EvaluationResult>,
    pub summary: EvaluationSummary,
    pub evaluated_at: DateTime<Utc>,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character-level similarity ratio of the normalised texts, in [0, 1].
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    TextDiff::from_chars(a.as_str(), b.as_str()).ratio() as f64
}

fn keywords(text: &str) -> HashSet<String> {
    normalize_text(text)
        .split_whitespace()
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_string)
        .collect()
}

/// Share of an answer's citations that share a keyword with the answer text.
pub fn citation_quality(answer: &Answer) -> f64 {
    if answer.citations.is_empty() {
        return 0.0;
    }
    let answer_words = keywords(answer.effective_text());
    let supported = answer
        .citations
        .iter()
        .filter(|c| !keywords(&c.text).is_disjoint(&answer_words))
        .count();
    supported as f64 / answer.citations.len() as f64
}

/// 1 when confidence equals accuracy, falling linearly to 0.
pub fn confidence_correlation(confidence: f64, accuracy: f64) -> f64 {
    (1.0 - (confidence - accuracy).abs()).max(0.0)
}

pub fn evaluate_answer(answer: &Answer, ground_truth: &str) -> EvaluationResult {
    let accuracy = text_similarity(answer.effective_text(), ground_truth);
    let citations = citation_quality(answer);
    let correlation = confidence_correlation(answer.confidence_score, accuracy);
    let overall =
        accuracy * ACCURACY_WEIGHT + citations * CITATION_WEIGHT + correlation * CORRELATION_WEIGHT;

    EvaluationResult {
        question_id: answer.question_id.clone(),
        answer_id: answer.id.clone(),
        ai_answer: answer.effective_text().to_string(),
        ground_truth_answer: ground_truth.to_string(),
        accuracy_score: round3(accuracy),
        citation_quality_score: round3(citations),
        confidence_correlation_score: round3(correlation),
        overall_score: round3(overall),
    }
}

fn summarize(total_questions: usize, results: &[EvaluationResult]) -> EvaluationSummary {
    let n = results.len().max(1) as f64;
    let avg = |f: fn(&EvaluationResult) -> f64| round3(results.iter().map(f).sum::<f64>() / n);
    EvaluationSummary {
        total_questions,
        evaluated_questions: results.len(),
        average_accuracy: avg(|r| r.accuracy_score),
        average_citation_quality: avg(|r| r.citation_quality_score),
        average_confidence_correlation: avg(|r| r.confidence_correlation_score),
        average_overall_score: avg(|r| r.overall_score),
    }
}

/// Score every answered question that has a ground-truth entry.
///
/// `ground_truth` is keyed by question id. Questions without an answer or
/// without ground truth are skipped.
pub fn evaluate_project(
    project: &Project,
    ground_truth: &HashMap<String, String>,
) -> Result<EvaluationReport, EvaluationError> {
    if !project.has_answers() {
        return Err(EvaluationError::NoAnswers);
    }

    let results: Vec<EvaluationResult> = project
        .questions_in_order()
        .into_iter()
        .filter_map(|q| {
            let answer = project.answers.get(&q.id)?;
            let truth = ground_truth.get(&q.id)?;
            Some(evaluate_answer(answer, truth))
        })
        .collect();

    if results.is_empty() {
        return Err(EvaluationError::NoGroundTruth);
    }

    Ok(EvaluationReport {
        project_id: project.id.clone(),
        summary: summarize(project.questions.len(), &results),
        results,
        evaluated_at: Utc::now(),
    })
}
