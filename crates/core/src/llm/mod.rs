// crates/core/src/llm/mod.rs
//! LLM integration for answer generation.
//!
//! Provides the `LlmProvider` trait and an OpenAI-compatible chat completion
//! client that covers OpenAI, OpenRouter and Ollama endpoints.

pub mod config;
pub mod factory;
pub mod openai;
pub mod provider;
pub mod types;

pub use config::{LlmConfig, ProviderType};
pub use factory::create_provider;
pub use openai::OpenAiCompatProvider;
pub use provider::LlmProvider;
pub use types::{CompletionRequest, CompletionResponse, LlmError};
