// crates/core/src/answer.rs
//! Grounded answer generation from retrieved document chunks.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::evaluation::normalize_text;
use crate::llm::{CompletionRequest, LlmError, LlmProvider};
use crate::types::{Answer, AnswerStatus, Citation, Question};

pub const MISSING_DATA_TEXT: &str = "Insufficient information in the indexed documents.";
const DEFAULT_CONFIDENCE: f64 = 0.5;
const CITATION_EXCERPT_CHARS: usize = 300;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers due-diligence questions \
based on provided documents. Always cite your sources and provide confidence scores.";

const STOPWORDS: &[&str] = &[
    "what", "does", "have", "with", "that", "this", "there", "which", "your", "from", "they",
    "were", "been", "their", "about", "into", "when", "where", "whom", "will", "would", "should",
    "could", "please", "describe", "provide", "firm", "fund",
];

/// A chunk returned by retrieval, ready to be shown to a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub chunk_id: String,
    pub filename: String,
    pub text: String,
    pub score: f32,
}

impl RetrievedChunk {
    fn citation(&self, text: String) -> Citation {
        Citation {
            document_id: self.document_id.clone(),
            chunk_id: self.chunk_id.clone(),
            text,
            page: None,
        }
    }
}

/// What a generator produced for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub confidence_score: f64,
    pub missing_data: bool,
}

impl GeneratedAnswer {
    pub fn missing() -> Self {
        Self {
            answer_text: MISSING_DATA_TEXT.to_string(),
            citations: Vec::new(),
            confidence_score: 0.0,
            missing_data: true,
        }
    }

    pub fn into_answer(self, question_id: &str) -> Answer {
        Answer {
            id: uuid::Uuid::new_v4().to_string(),
            question_id: question_id.to_string(),
            answer_text: self.answer_text,
            citations: self.citations,
            confidence_score: if self.confidence_score.is_finite() {
                self.confidence_score.clamp(0.0, 1.0)
            } else {
                0.0
            },
            status: if self.missing_data {
                AnswerStatus::MissingData
            } else {
                AnswerStatus::Generated
            },
            manual_answer: None,
            updated_at: Utc::now(),
        }
    }
}

/// Produces an answer for a question from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &Question,
        context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError>;

    /// Generator name for logging.
    fn name(&self) -> &str;
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn content_words(text: &str) -> HashSet<String> {
    normalize_text(text)
        .split_whitespace()
        .filter(|w| w.chars().count() >= 4 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '?', '!', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().count() > 3)
}

/// Offline generator: answers with the context sentence that best overlaps
/// the question's content words.
#[derive(Debug, Default, Clone)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(
        &self,
        question: &Question,
        context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError> {
        let wanted = content_words(&question.text);
        if wanted.is_empty() || context.is_empty() {
            return Ok(GeneratedAnswer::missing());
        }

        let mut best: Option<(usize, usize, &str)> = None;
        let mut supporting = Vec::new();
        for (chunk_idx, chunk) in context.iter().enumerate() {
            let mut chunk_hits = 0;
            for sentence in sentences(&chunk.text) {
                let hits = content_words(sentence).intersection(&wanted).count();
                chunk_hits = chunk_hits.max(hits);
                if hits > best.map_or(0, |(h, _, _)| h) {
                    best = Some((hits, chunk_idx, sentence));
                }
            }
            if chunk_hits > 0 {
                supporting.push(chunk_idx);
            }
        }

        let Some((hits, best_chunk, sentence)) = best else {
            return Ok(GeneratedAnswer::missing());
        };

        // The chunk holding the chosen sentence is cited first.
        supporting.retain(|&idx| idx != best_chunk);
        supporting.insert(0, best_chunk);
        let citations = supporting
            .into_iter()
            .map(|idx| {
                let chunk = &context[idx];
                chunk.citation(excerpt(&chunk.text, CITATION_EXCERPT_CHARS))
            })
            .collect();

        let coverage = hits as f64 / wanted.len() as f64;
        Ok(GeneratedAnswer {
            answer_text: sentence.to_string(),
            citations,
            confidence_score: (coverage * 1000.0).round() / 1000.0,
            missing_data: false,
        })
    }

    fn name(&self) -> &str {
        "extractive"
    }
}

/// Generator backed by an LLM chat completion.
pub struct LlmAnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl LlmAnswerGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_tokens: 500,
            temperature: 0.1,
        }
    }

    pub fn build_prompt(question: &Question, context: &[RetrievedChunk]) -> String {
        let excerpts = if context.is_empty() {
            "No relevant document excerpts found for this question.".to_string()
        } else {
            context
                .iter()
                .enumerate()
                .map(|(i, c)| format!("[{}] ({}) {}", i + 1, c.filename, c.text.trim()))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        format!(
            "Based on the following document excerpts, answer the question: \"{question}\"\n\n\
             Document excerpts:\n{excerpts}\n\n\
             Please provide:\n\
             1. A concise answer to the question\n\
             2. Citations to the numbered excerpts that support your answer\n\
             3. A confidence score between 0.0 and 1.0\n\n\
             If the excerpts do not contain the answer, reply with ANSWER: MISSING_DATA.\n\n\
             Format your response as:\n\
             ANSWER: [your answer]\n\
             CITATIONS: [one excerpt per line, e.g. [1] quoted text]\n\
             CONFIDENCE: [score]",
            question = question.text,
        )
    }
}

#[derive(PartialEq)]
enum Section {
    None,
    Answer,
    Citations,
}

/// Parse an `ANSWER:` / `CITATIONS:` / `CONFIDENCE:` response.
///
/// Citation lines that start with `[n]` are tied to the n-th context chunk;
/// other citation lines are matched to the first chunk containing their text.
pub fn parse_response(content: &str, context: &[RetrievedChunk]) -> Result<GeneratedAnswer, LlmError> {
    let mut answer_lines: Vec<&str> = Vec::new();
    let mut citations = Vec::new();
    let mut confidence = DEFAULT_CONFIDENCE;
    let mut section = Section::None;
    let mut saw_answer = false;

    for line in content.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("ANSWER:") {
            saw_answer = true;
            section = Section::Answer;
            if !rest.trim().is_empty() {
                answer_lines.push(rest.trim());
            }
        } else if let Some(rest) = line.strip_prefix("CITATIONS:") {
            section = Section::Citations;
            if let Some(c) = parse_citation_line(rest.trim(), context) {
                citations.push(c);
            }
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            section = Section::None;
            confidence = rest
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|c| c.is_finite())
                .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0));
        } else if !line.is_empty() {
            match section {
                Section::Answer => answer_lines.push(line),
                Section::Citations => {
                    if let Some(c) = parse_citation_line(line, context) {
                        citations.push(c);
                    }
                }
                Section::None => {}
            }
        }
    }

    if !saw_answer {
        return Err(LlmError::InvalidFormat("response has no ANSWER: line".into()));
    }

    let answer_text = answer_lines.join(" ");
    if answer_text.is_empty() || answer_text.eq_ignore_ascii_case("MISSING_DATA") {
        return Ok(GeneratedAnswer::missing());
    }

    Ok(GeneratedAnswer {
        answer_text,
        citations,
        confidence_score: confidence,
        missing_data: false,
    })
}

fn parse_citation_line(line: &str, context: &[RetrievedChunk]) -> Option<Citation> {
    let line = line.trim_start_matches(['-', '*', ' ']).trim();
    if line.is_empty() || line.eq_ignore_ascii_case("none") {
        return None;
    }

    if let Some(rest) = line.strip_prefix('[') {
        if let Some((num, tail)) = rest.split_once(']') {
            if let Some(chunk) = num
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| context.get(i))
            {
                let quoted = tail.trim().trim_matches('"').trim();
                let text = if quoted.is_empty() {
                    excerpt(&chunk.text, CITATION_EXCERPT_CHARS)
                } else {
                    quoted.to_string()
                };
                return Some(chunk.citation(text));
            }
        }
    }

    let needle = line.trim_matches('"');
    context
        .iter()
        .find(|c| c.text.contains(needle))
        .map(|c| c.citation(needle.to_string()))
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(
        &self,
        question: &Question,
        context: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, LlmError> {
        if context.is_empty() {
            return Ok(GeneratedAnswer::missing());
        }

        let request = CompletionRequest {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            user_prompt: Self::build_prompt(question, context),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let response = self.provider.complete(request).await?;
        tracing::debug!(
            provider = self.provider.name(),
            question_id = %question.id,
            latency_ms = response.latency_ms,
            "answer completion received"
        );
        parse_response(&response.content, context)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;

    fn question(text: &str) -> Question {
        Question {
            id: "q1".into(),
            text: text.into(),
            section: "General".into(),
            order: 1,
        }
    }

    fn chunk(id: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            document_id: "doc-1".into(),
            chunk_id: id.into(),
            filename: "f.pdf".into(),
            text: text.into(),
            score: 1.0,
        }
    }

    #[tokio::test]
    async fn test_extractive_picks_best_sentence() {
        let context = vec![
            chunk("doc-1:0", "The board meets quarterly. Minutes are kept."),
            chunk(
                "doc-1:1",
                "Intro text. The auditor of the partnership is Deloitte Luxembourg. Other text.",
            ),
        ];
        let answer = ExtractiveGenerator::new()
            .generate(&question("Who is the auditor of the partnership?"), &context)
            .await
            .unwrap();
        assert_eq!(answer.answer_text, "The auditor of the partnership is Deloitte Luxembourg.");
        assert_eq!(answer.citations[0].chunk_id, "doc-1:1");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.confidence_score, 1.0);
        assert!(!answer.missing_data);
    }

    #[tokio::test]
    async fn test_extractive_without_context_is_missing_data() {
        let generated = ExtractiveGenerator::new()
            .generate(&question("Who is the auditor?"), &[])
            .await
            .unwrap();
        assert!(generated.missing_data);
        let answer = generated.into_answer("q1");
        assert_eq!(answer.status, AnswerStatus::MissingData);
        assert_eq!(answer.confidence_score, 0.0);
    }

    #[tokio::test]
    async fn test_extractive_unrelated_context_is_missing_data() {
        let context = vec![chunk("doc-1:0", "Completely unrelated words here.")];
        let generated = ExtractiveGenerator::new()
            .generate(&question("Who is the auditor?"), &context)
            .await
            .unwrap();
        assert!(generated.missing_data);
    }

    #[test]
    fn test_parse_response_with_numbered_citations() {
        let context = vec![chunk("doc-1:0", "Fund size is $500m."), chunk("doc-1:1", "Closing in 2024.")];
        let content = "ANSWER: The fund targets $500m.\nCITATIONS:\n[1] \"Fund size is $500m.\"\n- [9] bogus\nCONFIDENCE: 0.85";
        let parsed = parse_response(content, &context).unwrap();
        assert_eq!(parsed.answer_text, "The fund targets $500m.");
        assert_eq!(parsed.citations.len(), 1);
        assert_eq!(parsed.citations[0].chunk_id, "doc-1:0");
        assert_eq!(parsed.citations[0].text, "Fund size is $500m.");
        assert!((parsed.confidence_score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_parse_response_defaults_and_clamps() {
        let parsed = parse_response("ANSWER: Yes\nCONFIDENCE: high", &[]).unwrap();
        assert_eq!(parsed.confidence_score, 0.5);
        let parsed = parse_response("ANSWER: Yes\nCONFIDENCE: 7", &[]).unwrap();
        assert_eq!(parsed.confidence_score, 1.0);
        let parsed = parse_response("ANSWER: MISSING_DATA\nCONFIDENCE: 0.9", &[]).unwrap();
        assert!(parsed.missing_data);
        assert!(matches!(
            parse_response("I cannot help", &[]),
            Err(LlmError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_non_finite_confidence_falls_back() {
        for raw in ["NaN", "inf", "-inf"] {
            let content = format!("ANSWER: Deloitte audits the fund.\nCONFIDENCE: {raw}");
            let parsed = parse_response(&content, &[]).unwrap();
            assert_eq!(parsed.confidence_score, 0.5, "{raw}");

            // The stored answer must survive a JSON round trip.
            let answer = parsed.into_answer("q1");
            let json = serde_json::to_string(&answer).unwrap();
            let back: Answer = serde_json::from_str(&json).unwrap();
            assert_eq!(back.confidence_score, 0.5);
        }

        let mut generated = GeneratedAnswer::missing();
        generated.confidence_score = f64::NAN;
        assert_eq!(generated.into_answer("q1").confidence_score, 0.0);
    }

    struct CannedProvider(String);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            assert!(request.user_prompt.contains("[1] (f.pdf)"));
            Ok(CompletionResponse {
                content: self.0.clone(),
                model: None,
                input_tokens: None,
                output_tokens: None,
                latency_ms: 1,
            })
        }
        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
        fn name(&self) -> &str {
            "canned"
        }
        fn model(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_llm_generator_round_trip() {
        let provider = Arc::new(CannedProvider("ANSWER: Deloitte\nCITATIONS: [1]\nCONFIDENCE: 0.9".into()));
        let generator = LlmAnswerGenerator::new(provider);
        let context = vec![chunk("doc-1:0", "Auditor: Deloitte.")];
        let answer = generator.generate(&question("Who audits?"), &context).await.unwrap();
        assert_eq!(answer.answer_text, "Deloitte");
        assert_eq!(answer.citations[0].text, "Auditor: Deloitte.");
        assert_eq!(generator.name(), "canned");
    }
}
