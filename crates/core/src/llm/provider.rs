// crates/core/src/llm/provider.rs
//! LlmProvider trait defining the interface for LLM integrations.

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for LLM providers that can answer a prompt.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run a completion with an optional system prompt and a user prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Check if the provider is reachable with the configured credentials.
    async fn health_check(&self) -> Result<(), LlmError>;

    /// Provider name for logging (e.g. "openrouter", "ollama").
    fn name(&self) -> &str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;
}
