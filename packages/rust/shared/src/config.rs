//! Application configuration for Ragline.
//!
//! User config lives at `~/.ragline/ragline.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RaglineError, Result};
use crate::types::MAX_SOURCES;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "ragline.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".ragline";

// ---------------------------------------------------------------------------
// Config structs (matching ragline.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion and embedding provider settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Web search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Retrieval and chunking knobs.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Message log location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// API base URL (override for compatible gateways).
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model used for rephrasing and answering.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used for follow-up generation.
    #[serde(default = "default_followup_model")]
    pub followup_model: String,

    /// Model used for fragment and query embeddings.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base_url(),
            chat_model: default_chat_model(),
            followup_model: default_followup_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_followup_model() -> String {
    "gpt-4".into()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Search endpoint URL.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// The provider's own domain; results linking there are dropped.
    #[serde(default = "default_provider_domain")]
    pub provider_domain: String,

    /// Number of raw results requested per search.
    #[serde(default = "default_result_count")]
    pub result_count: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
            provider_domain: default_provider_domain(),
            result_count: default_result_count(),
        }
    }
}

fn default_search_key_env() -> String {
    "BRAVE_SEARCH_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}
fn default_provider_domain() -> String {
    "brave.com".into()
}
fn default_result_count() -> u32 {
    10
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Maximum number of sources fetched per query (capped at 4).
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Hard per-source deadline for the page fetch, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Minimum extracted text length (chars) for a source to be usable.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Fragment size in chars.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Similarity metric: "cosine", "dot", or "euclidean".
    #[serde(default = "default_metric")]
    pub metric: String,

    /// Allow fetching loopback/private hosts (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_sources: default_max_sources(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            min_content_chars: default_min_content_chars(),
            chunk_size: default_chunk_size(),
            metric: default_metric(),
            allow_private_hosts: false,
        }
    }
}

fn default_max_sources() -> usize {
    MAX_SOURCES
}
fn default_fetch_timeout_ms() -> u64 {
    1500
}
fn default_min_content_chars() -> usize {
    250
}
fn default_chunk_size() -> usize {
    200
}
fn default_metric() -> String {
    "cosine".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the message log database. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.ragline/messages.db".into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model for rephrasing and streaming answers.
    pub chat_model: String,
    /// Model for follow-up questions.
    pub followup_model: String,
    /// Source cap, never above [`MAX_SOURCES`].
    pub max_sources: usize,
    /// Per-source fetch deadline.
    pub fetch_timeout: Duration,
    /// Minimum usable extracted length in chars.
    pub min_content_chars: usize,
    /// Fragment size in chars.
    pub chunk_size: usize,
    /// Similarity metric name.
    pub metric: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chat_model: config.openai.chat_model.clone(),
            followup_model: config.openai.followup_model.clone(),
            max_sources: config.pipeline.max_sources.min(MAX_SOURCES),
            fetch_timeout: Duration::from_millis(config.pipeline.fetch_timeout_ms),
            min_content_chars: config.pipeline.min_content_chars,
            chunk_size: config.pipeline.chunk_size,
            metric: config.pipeline.metric.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.ragline/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| RaglineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.ragline/ragline.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RaglineError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RaglineError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RaglineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RaglineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RaglineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from the env var named in config.
pub fn api_key(var_name: &str, service: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RaglineError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Resolve the message log path, expanding a leading `~`.
pub fn resolve_db_path(config: &AppConfig) -> Result<PathBuf> {
    expand_home(&config.storage.db_path)
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| RaglineError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
