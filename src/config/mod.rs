pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Env var naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "ZAI_PROXY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub base_path: String,
    /// Answer `stream=true` requests with one aggregated document.
    #[serde(default)]
    pub buffered_only: bool,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            base_path: String::new(),
            buffered_only: false,
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
        }
    }
}

/// z.ai upstream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `X-FE-Version` used until the first successful refresh.
    #[serde(default = "default_fe_version")]
    pub fe_version_fallback: String,
    /// Seconds between front-end version refreshes; 0 disables the task.
    #[serde(default = "default_version_refresh_secs")]
    pub version_refresh_secs: u64,
    #[serde(default = "default_true")]
    pub upload_images: bool,
    #[serde(default)]
    pub use_env_proxy: bool,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    "https://chat.z.ai".to_string()
}
fn default_fe_version() -> String {
    "20241108.1".to_string()
}
fn default_version_refresh_secs() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            fe_version_fallback: default_fe_version(),
            version_refresh_secs: default_version_refresh_secs(),
            upload_images: true,
            use_env_proxy: false,
            proxy: None,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json` log lines.
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Model used when a request leaves `model` empty.
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_model() -> String {
    "GLM-4.6".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            default_model: default_model(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Force buffered responses when running on a serverless platform.
    pub fn apply_env_overrides(&mut self) {
        if serverless_env_detected(|key| std::env::var(key).ok()) {
            self.server.buffered_only = true;
        }
    }
}

fn serverless_env_detected(get: impl Fn(&str) -> Option<String>) -> bool {
    get("VERCEL").as_deref() == Some("1")
        || get("AWS_LAMBDA_FUNCTION_NAME").is_some_and(|name| !name.is_empty())
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the validated defaults.
///
/// # Errors
///
/// Same as [`load_config`] except for a missing file.
pub fn load_config_or_default(path: &str) -> Result<AppConfig, ConfigError> {
    match load_config(path) {
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            let config = AppConfig::default();
            validate_config(&config)?;
            Ok(config)
        }
        other => other,
    }
}

/// Config path from `ZAI_PROXY_CONFIG`, or `config.yaml`.
#[must_use]
pub fn config_path_from_env() -> String {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
