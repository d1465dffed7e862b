//! Application configuration for keyword research.
//!
//! User config lives at `~/.kwresearch/kwresearch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ResearchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kwresearch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kwresearch";

// ---------------------------------------------------------------------------
// Config structs (matching kwresearch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Per-stage retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Document fetching.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Search backend.
    #[serde(default)]
    pub search: SearchConfig,

    /// OpenRouter settings for the analyzer.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Keywords researched in parallel.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Wall-clock budget for one keyword, all stages included.
    #[serde(default = "default_per_keyword_timeout")]
    pub per_keyword_timeout_secs: u64,

    /// Search hits requested per keyword.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Relevance at or above which a report counts as high quality.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Stop dispatching new keywords after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_deadline_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_keyword_timeout_secs: default_per_keyword_timeout(),
            max_results: default_max_results(),
            quality_threshold: default_quality_threshold(),
            overall_deadline_secs: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_per_keyword_timeout() -> u64 {
    120
}
fn default_max_results() -> usize {
    5
}
fn default_quality_threshold() -> f64 {
    0.85
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per stage, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait before the second attempt.
    #[serde(default = "default_initial_wait")]
    pub initial_wait_ms: u64,

    /// Growth factor applied to the wait after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any single wait.
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,

    /// Random spread applied to each wait, as a fraction of it.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_wait_ms: default_initial_wait(),
            backoff_multiplier: default_backoff_multiplier(),
            max_wait_ms: default_max_wait(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_wait() -> u64 {
    500
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_wait() -> u64 {
    10_000
}
fn default_jitter_ratio() -> f64 {
    0.2
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Fetched content is truncated to this many characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Length of the excerpt stored in each report.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// HTTP timeout per request.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Allow fetching loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
            excerpt_chars: default_excerpt_chars(),
            timeout_secs: default_fetch_timeout(),
            allow_private_hosts: false,
        }
    }
}

fn default_max_content_chars() -> usize {
    10_000
}
fn default_excerpt_chars() -> usize {
    500
}
fn default_fetch_timeout() -> u64 {
    30
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of a SearXNG-compatible instance.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Optional search language (e.g. `en`, `de`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            timeout_secs: default_search_timeout(),
            language: None,
        }
    }
}

fn default_search_endpoint() -> String {
    "http://localhost:8888".into()
}
fn default_search_timeout() -> u64 {
    15
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for analysis.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_analyzer_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_analyzer_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_analyzer_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kwresearch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ResearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kwresearch/kwresearch.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ResearchError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ResearchError::parse(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Upper bound for `retry.max_wait_ms` (one hour).
const MAX_RETRY_WAIT_MS: u64 = 3_600_000;

/// Reject values the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.defaults.max_concurrency == 0 {
        return Err(ResearchError::validation(
            "defaults.max_concurrency must be at least 1",
        ));
    }
    if !(0.0..=1.0).contains(&config.defaults.quality_threshold) {
        return Err(ResearchError::validation(
            "defaults.quality_threshold must be within [0, 1]",
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(ResearchError::validation("retry.max_attempts must be at least 1"));
    }
    let multiplier = config.retry.backoff_multiplier;
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(ResearchError::validation(
            "retry.backoff_multiplier must be a finite number of at least 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
        return Err(ResearchError::validation(
            "retry.jitter_ratio must be within [0, 1]",
        ));
    }
    if config.retry.max_wait_ms > MAX_RETRY_WAIT_MS {
        return Err(ResearchError::validation(format!(
            "retry.max_wait_ms must be at most {MAX_RETRY_WAIT_MS}"
        )));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ResearchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ResearchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ResearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ResearchError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
