// crates/core/src/llm/config.rs
//! LLM provider configuration types.

use std::str::FromStr;

/// Configuration for an LLM provider instance.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderType,
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

/// Supported LLM provider types. All speak the OpenAI chat completions API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAi,
    OpenRouter,
    Ollama,
    /// Any other OpenAI-compatible server; needs an explicit endpoint.
    Custom,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::OpenRouter => "openrouter",
            ProviderType::Ollama => "ollama",
            ProviderType::Custom => "custom",
        }
    }

    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAi => Some("https://api.openai.com/v1"),
            ProviderType::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderType::Ollama => Some("http://localhost:11434/v1"),
            ProviderType::Custom => None,
        }
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAi),
            "openrouter" => Ok(ProviderType::OpenRouter),
            "ollama" => Ok(ProviderType::Ollama),
            "custom" => Ok(ProviderType::Custom),
            other => Err(format!("unknown LLM provider: {other}")),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenRouter,
            model: "openai/gpt-4o-mini".into(),
            api_key: None,
            endpoint: None,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// The configured endpoint, or the provider's default one.
    pub fn resolved_endpoint(&self) -> Option<String> {
        self.endpoint
            .clone()
            .or_else(|| self.provider.default_endpoint().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("OpenRouter".parse::<ProviderType>(), Ok(ProviderType::OpenRouter));
        assert_eq!("ollama".parse::<ProviderType>(), Ok(ProviderType::Ollama));
        assert!("anthropic-cli".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_resolved_endpoint() {
        let config = LlmConfig::default();
        assert_eq!(config.resolved_endpoint().as_deref(), Some("https://openrouter.ai/api/v1"));

        let custom = LlmConfig {
            provider: ProviderType::Custom,
            ..LlmConfig::default()
        };
        assert!(custom.resolved_endpoint().is_none());
    }
}
