// crates/server/src/config.rs
//! Command-line and environment configuration for the server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use diligence_core::llm::{create_provider, LlmConfig, LlmError, ProviderType};
use diligence_core::{AnswerGenerator, ChunkerConfig, ExtractiveGenerator, LlmAnswerGenerator};
use diligence_observability::{LogConfig, LogFormat};

use crate::janitor::JanitorSettings;
use crate::jobs::JobSettings;

/// How answers are produced from retrieved chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GeneratorKind {
    /// Pick the best-matching sentences; no network access.
    Extractive,
    /// Ask an OpenAI-compatible chat model.
    Llm,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "diligence")]
#[command(about = "Due-diligence questionnaire answering service")]
#[command(version)]
pub struct ServerConfig {
    #[arg(long, env = "DILIGENCE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "DILIGENCE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// SQLite file; defaults to the platform data directory.
    #[arg(long, env = "DILIGENCE_DB_PATH", conflicts_with = "in_memory")]
    pub db_path: Option<PathBuf>,

    /// Keep all state in memory. Nothing survives a restart.
    #[arg(long, default_value_t = false)]
    pub in_memory: bool,

    /// Directory that documents and questionnaires named by filename are read from.
    #[arg(long, env = "DILIGENCE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long = "log", env = "DILIGENCE_LOG", default_value = "info,sqlx=warn,tantivy=warn")]
    pub log_filter: String,

    #[arg(long, env = "DILIGENCE_LOG_FORMAT", default_value = "compact", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    /// Also write daily-rolling JSON logs here.
    #[arg(long, env = "DILIGENCE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "DILIGENCE_GENERATOR", value_enum, default_value_t = GeneratorKind::Extractive)]
    pub generator: GeneratorKind,

    #[arg(long, env = "DILIGENCE_LLM_PROVIDER", default_value = "openrouter", value_parser = parse_provider)]
    pub llm_provider: ProviderType,

    #[arg(long, env = "DILIGENCE_LLM_ENDPOINT")]
    pub llm_endpoint: Option<String>,

    #[arg(long, env = "DILIGENCE_LLM_MODEL", default_value = "openai/gpt-4o-mini")]
    pub llm_model: String,

    #[arg(long, env = "DILIGENCE_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "DILIGENCE_LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,

    /// Chunks retrieved per question.
    #[arg(long, env = "DILIGENCE_TOP_K", default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=50))]
    pub top_k: u16,

    #[arg(long, env = "DILIGENCE_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    #[arg(long, env = "DILIGENCE_CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Fail non-terminal jobs that report no progress for this long.
    #[arg(long, env = "DILIGENCE_STALE_JOB_SECS", default_value_t = 900)]
    pub stale_job_secs: u64,

    /// Forget terminal jobs older than this.
    #[arg(long, env = "DILIGENCE_JOB_RETENTION_SECS", default_value_t = 86_400)]
    pub job_retention_secs: u64,

    #[arg(long, env = "DILIGENCE_JANITOR_INTERVAL_SECS", default_value_t = 60)]
    pub janitor_interval_secs: u64,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

fn parse_provider(s: &str) -> Result<ProviderType, String> {
    s.parse()
}

impl ServerConfig {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            default_filter: self.log_filter.clone(),
            format: self.log_format,
            log_dir: self.log_dir.clone(),
        }
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.llm_provider,
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            endpoint: self.llm_endpoint.clone(),
            timeout_secs: self.llm_timeout_secs,
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            data_dir: self.data_dir.clone(),
            top_k: usize::from(self.top_k),
            chunker: ChunkerConfig {
                chunk_size: self.chunk_size.max(1),
                chunk_overlap: self.chunk_overlap.min(self.chunk_size.saturating_sub(1)),
            },
        }
    }

    pub fn janitor_settings(&self) -> JanitorSettings {
        JanitorSettings {
            interval: Duration::from_secs(self.janitor_interval_secs.max(1)),
            stale_after: Duration::from_secs(self.stale_job_secs),
            retention: Duration::from_secs(self.job_retention_secs),
        }
    }

    pub fn build_generator(&self) -> Result<Arc<dyn AnswerGenerator>, LlmError> {
        match self.generator {
            GeneratorKind::Extractive => Ok(Arc::new(ExtractiveGenerator::new())),
            GeneratorKind::Llm => {
                let provider = create_provider(&self.llm_config())?;
                Ok(Arc::new(LlmAnswerGenerator::new(provider)))
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
