// crates/core/src/llm/factory.rs
//! Provider factory: creates an LlmProvider from configuration.

use std::sync::Arc;

use super::config::LlmConfig;
use super::openai::OpenAiCompatProvider;
use super::provider::LlmProvider;
use super::types::LlmError;

/// Create an LLM provider based on the given configuration.
///
/// Fails when no endpoint can be determined (a `Custom` provider without one)
/// or the HTTP client cannot be built.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let endpoint = config.resolved_endpoint().ok_or_else(|| {
        LlmError::NotAvailable(format!(
            "provider {} needs an explicit endpoint",
            config.provider.as_str()
        ))
    })?;

    let provider = OpenAiCompatProvider::new(
        config.provider.as_str(),
        endpoint,
        &config.model,
        config.api_key.clone(),
        config.timeout_secs,
    )?;
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::config::ProviderType;

    #[test]
    fn test_create_provider_uses_default_endpoint() {
        let provider = create_provider(&LlmConfig {
            provider: ProviderType::Ollama,
            model: "llama3".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama3");
    }

    #[test]
    fn test_custom_without_endpoint_fails() {
        let result = create_provider(&LlmConfig {
            provider: ProviderType::Custom,
            ..LlmConfig::default()
        });
        assert!(matches!(result, Err(LlmError::NotAvailable(_))));
    }
}
