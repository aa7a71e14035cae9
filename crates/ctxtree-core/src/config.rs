use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (ctxtree.toml + CTXTREE_* env overrides). Every field
/// here corresponds to one of the documented `CTXTREE_*` environment
/// variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtxtreeConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for CtxtreeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
            },
            providers: ProvidersConfig::default(),
            buffer: BufferConfig::default(),
            summarizer: SummarizerConfig::default(),
            retrieval: RetrievalConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// LM provider credentials and model selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub ollama: Option<OllamaConfig>,
    /// Model used for chat completion (`lm_model_primary`).
    #[serde(default = "default_model_primary")]
    pub lm_model_primary: String,
    /// Model used for intent classification + sub-query decomposition
    /// (`lm_model_decomposition`) — deliberately allowed to be a cheaper
    /// model than the primary chat model.
    #[serde(default = "default_model_decomposition")]
    pub lm_model_decomposition: String,
    /// Name of the embedding model (`embedding_model`). Changing this
    /// requires a fresh archive collection — see `ArchiveConfig::path`.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// `lm_api_key`.
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

/// `buffer_max_turns` and friends — Message Buffer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

/// `summarization_start_threshold` / `summarization_interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_start_threshold")]
    pub start_threshold: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            start_threshold: default_start_threshold(),
            interval: default_interval(),
        }
    }
}

/// `retrieval_window_seconds` / `retrieval_top_k` / `retrieval_enabled_default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_k_per_subquery")]
    pub top_k_per_subquery: usize,
    #[serde(default)]
    pub enabled_default: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            top_k: default_top_k(),
            top_k_per_subquery: default_top_k_per_subquery(),
            enabled_default: true,
        }
    }
}

/// `archive_path` — persistent storage location for the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_path")]
    pub path: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model_primary() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_model_decomposition() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_turns() -> usize {
    15
}
fn default_start_threshold() -> u64 {
    15
}
fn default_interval() -> u64 {
    5
}
fn default_window_seconds() -> f64 {
    60.0
}
fn default_top_k() -> usize {
    5
}
fn default_top_k_per_subquery() -> usize {
    5
}
fn default_archive_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.ctxtree/archive")
}

impl CtxtreeConfig {
    /// Load config from a TOML file with `CTXTREE_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `CTXTREE_CONFIG` env var
    ///   3. `~/.ctxtree/ctxtree.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CTXTREE_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: CtxtreeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CTXTREE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        // The `max_turns < start_threshold` case never fires summarization.
        // Accepted rather than rejected, but surfaced here rather than
        // silently "fixed" by raising max_turns behind the caller's back.
        if config.buffer.max_turns < config.summarizer.start_threshold as usize {
            tracing::warn!(
                max_turns = config.buffer.max_turns,
                start_threshold = config.summarizer.start_threshold,
                "buffer_max_turns is below summarization_start_threshold; summarization will never trigger for this buffer"
            );
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.ctxtree/ctxtree.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = CtxtreeConfig::default();
        assert_eq!(cfg.buffer.max_turns, 15);
        assert_eq!(cfg.summarizer.start_threshold, 15);
        assert_eq!(cfg.summarizer.interval, 5);
        assert_eq!(cfg.retrieval.window_seconds, 60.0);
        assert_eq!(cfg.retrieval.top_k, 5);
    }
}
