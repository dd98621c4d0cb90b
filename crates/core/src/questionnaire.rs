// crates/core/src/questionnaire.rs
//! Questionnaire parsing: numbered text into ordered, sectioned questions.
//!
//! Two numbering styles are recognised. Detailed numbering (`1.1`, `2.0`)
//! is tried first; a question body runs until the next detailed marker, a
//! blank line, or the end of the text. If no detailed marker exists the
//! parser falls back to simple numbering (`1.`, `2.`), one question per line.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QuestionnaireError;
use crate::types::Question;

/// Only the first this-many numbered candidates are considered.
pub const MAX_CANDIDATES: usize = 50;

const INTERROGATIVE_PREFIXES: &[&str] = &[
    "Does", "Has", "What", "Is", "Are", "How", "Why", "When", "Where", "Who",
];

const SECTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("Financial", &["financial", "valuation", "accounting", "reporting"]),
    ("Legal", &["legal", "litigation", "contract", "administration"]),
    ("Operations", &["operation", "business", "market", "team", "fund terms"]),
    ("Governance", &["governance", "risk", "compliance"]),
    ("ESG", &["esg", "environmental", "social", "diversity", "inclusion"]),
];

/// A question supplied directly rather than parsed from text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionInput {
    pub text: String,
    #[serde(default)]
    pub section: Option<String>,
}

fn detailed_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+").expect("valid regex"))
}

fn detailed_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.\d+)\s+").expect("valid regex"))
}

fn simple_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\.\s+(.+)").expect("valid regex"))
}

fn checkbox_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*☐\s*☐\s*$").expect("valid regex"))
}

/// Bodies of detailed-numbered items, in document order.
fn detailed_candidates(text: &str) -> Vec<&str> {
    let mut bodies = Vec::new();
    let mut pos = 0;

    while let Some(heading) = detailed_heading().find_at(text, pos) {
        let start = heading.end();
        if start >= text.len() {
            break;
        }
        // The body is at least one character long.
        let first_char = text[start..].chars().next().map_or(1, char::len_utf8);
        let search_from = start + first_char;

        let mut end = text.len();
        if let Some(next) = detailed_marker().find_at(text, search_from) {
            end = end.min(next.start());
        }
        if let Some(blank) = text[search_from..].find("\n\n") {
            end = end.min(search_from + blank);
        }

        bodies.push(&text[start..end]);
        pos = end;
    }

    bodies
}

fn simple_candidates(text: &str) -> Vec<&str> {
    simple_line()
        .captures_iter(text)
        .filter_map(|caps| caps.get(2).map(|m| m.as_str()))
        .collect()
}

fn is_interrogative(text: &str) -> bool {
    INTERROGATIVE_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Normalise a candidate body, or drop it if it is not a question.
fn clean_candidate(raw: &str) -> Option<String> {
    let text = raw.trim().replace('\n', " ");
    let interrogative = is_interrogative(&text);

    if text.chars().count() <= 10 || !(text.contains('?') || interrogative) {
        return None;
    }
    // Headings such as "Firm: General Information?" are not questions.
    if text.contains(':') && !interrogative {
        return None;
    }

    let text = checkbox_suffix().replace(&text, "").into_owned();
    Some(text)
}

/// Pick a section for a question from keywords in its text.
pub fn classify_section(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    SECTION_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(section, _)| *section)
        .unwrap_or("General")
}

/// Parse questionnaire text into questions numbered from 1.
pub fn parse_questionnaire(text: &str) -> Result<Vec<Question>, QuestionnaireError> {
    let mut candidates = detailed_candidates(text);
    if candidates.is_empty() {
        candidates = simple_candidates(text);
    }
    tracing::debug!(candidates = candidates.len(), "questionnaire candidates found");

    let questions: Vec<Question> = candidates
        .into_iter()
        .take(MAX_CANDIDATES)
        .filter_map(clean_candidate)
        .enumerate()
        .map(|(idx, text)| Question {
            id: uuid::Uuid::new_v4().to_string(),
            section: classify_section(&text).to_string(),
            text,
            order: idx as u32 + 1,
        })
        .collect();

    if questions.is_empty() {
        return Err(QuestionnaireError::NoQuestions);
    }
    Ok(questions)
}

/// Build questions from an explicit list, keeping the given order.
pub fn questions_from_inputs(inputs: &[QuestionInput]) -> Result<Vec<Question>, QuestionnaireError> {
    if inputs.is_empty() {
        return Err(QuestionnaireError::NoQuestions);
    }

    inputs
        .iter()
        .enumerate()
        .map(|(idx, input)| {
            let text = input.text.trim();
            if text.is_empty() {
                return Err(QuestionnaireError::EmptyQuestion { index: idx });
            }
            let section = input
                .section
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| classify_section(text).to_string());
            Ok(Question {
                id: uuid::Uuid::new_v4().to_string(),
                text: text.to_string(),
                section,
                order: idx as u32 + 1,
            })
        })
        .collect()
}
