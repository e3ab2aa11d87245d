use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Top-level configuration for the loanq service.
///
/// Loaded from `~/.loanq/config.toml` by default. Every section is optional
/// and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanqConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl LoanqConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LoanqConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the HTTP server binds to.
    pub host: String,
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Which translator backs the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic keyword translator, no model required.
    #[default]
    Rules,
    /// Ollama chat endpoint.
    Ollama,
}

/// Language-model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the model server.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    /// Per-call timeout; an expired call is reported as a provider failure.
    pub timeout_secs: u64,
    /// Extra attempts after a failed call, with exponential backoff.
    pub max_retries: u32,
    /// Phrase explanations with the model instead of templates.
    pub llm_explanations: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Rules,
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.1,
            timeout_secs: 30,
            max_retries: 0,
            llm_explanations: false,
        }
    }
}

/// Conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of most recent turns handed to the translator as context.
    pub context_turns: usize,
    /// Maximum question length in characters.
    pub max_question_length: usize,
    /// Answer greetings directly instead of translating them.
    pub answer_greetings: bool,
    /// Sessions idle longer than this are dropped. 0 keeps them forever.
    pub session_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_turns: 10,
            max_question_length: 2000,
            answer_greetings: true,
            session_timeout_secs: 1800,
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON array of loan records. When unset, mock data is generated.
    pub data_file: Option<String>,
    /// Seed for mock data generation.
    pub seed: u64,
    /// Number of mock records to generate.
    pub record_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_file: None,
            seed: 42,
            record_count: 50,
        }
    }
}

/// Query executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Permit summing or averaging amounts across different currencies.
    /// When false, such aggregates fail with a mixed-currency error.
    pub allow_mixed_currency: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            allow_mixed_currency: true,
        }
    }
}
