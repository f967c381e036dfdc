use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Largest accepted request body, uploads included
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens. Generated per process when empty.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
    /// Development mode: every request runs as the dev user
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_dev_user_email")]
    pub dev_user_email: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_minutes: default_access_token_minutes(),
            refresh_token_days: default_refresh_token_days(),
            disabled: false,
            dev_user_email: default_dev_user_email(),
        }
    }
}

fn default_access_token_minutes() -> i64 {
    15
}

fn default_refresh_token_days() -> i64 {
    7
}

fn default_dev_user_email() -> String {
    "dev@yuga.local".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_standard_requests")]
    pub standard_requests_per_window: u32,
    #[serde(default = "default_standard_window")]
    pub standard_window_seconds: u64,
    #[serde(default = "default_ai_requests")]
    pub ai_requests_per_window: u32,
    #[serde(default = "default_ai_window")]
    pub ai_window_seconds: u64,
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_auth_window")]
    pub auth_window_seconds: u64,
    /// Seconds between sweeps of idle client entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            standard_requests_per_window: default_standard_requests(),
            standard_window_seconds: default_standard_window(),
            ai_requests_per_window: default_ai_requests(),
            ai_window_seconds: default_ai_window(),
            auth_requests_per_window: default_auth_requests(),
            auth_window_seconds: default_auth_window(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_standard_requests() -> u32 {
    60
}

fn default_standard_window() -> u64 {
    60
}

fn default_ai_requests() -> u32 {
    10
}

fn default_ai_window() -> u64 {
    60
}

fn default_auth_requests() -> u32 {
    5
}

fn default_auth_window() -> u64 {
    15 * 60
}

fn default_cleanup_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Auto,
    Docker,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_runtime_type")]
    pub runtime_type: RuntimeType,
    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,
    /// Memory cap per build container, in bytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: i64,
    /// CFS quota per build container (100000 = one full CPU)
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
    /// Prefix prepended to builder image names, e.g. "ghcr.io/yuga/"
    #[serde(default)]
    pub image_prefix: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_type: default_runtime_type(),
            docker_socket: default_docker_socket(),
            memory_limit: default_memory_limit(),
            cpu_quota: default_cpu_quota(),
            timeout_secs: default_build_timeout(),
            image_prefix: String::new(),
        }
    }
}

fn default_runtime_type() -> RuntimeType {
    RuntimeType::Auto
}

fn default_docker_socket() -> String {
    if cfg!(windows) {
        "npipe:////./pipe/docker_engine".to_string()
    } else {
        "/var/run/docker.sock".to_string()
    }
}

fn default_memory_limit() -> i64 {
    4096 * 1024 * 1024
}

fn default_cpu_quota() -> i64 {
    100_000
}

fn default_build_timeout() -> u64 {
    15 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Jobs processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_keep_jobs")]
    pub keep_completed: i64,
    #[serde(default = "default_keep_jobs")]
    pub keep_failed: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            keep_completed: default_keep_jobs(),
            keep_failed: default_keep_jobs(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_keep_jobs() -> i64 {
    100
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    /// OpenAI-compatible chat completions endpoint
    OpenAi,
    /// Deterministic local output, no network
    Offline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_provider")]
    pub provider: AiProviderKind,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used when the request does not map to a known one
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_ai_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_ai_provider(),
            base_url: default_ai_base_url(),
            api_key: None,
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_ai_timeout(),
        }
    }
}

fn default_ai_provider() -> AiProviderKind {
    AiProviderKind::OpenAi
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_primary_model() -> String {
    "gpt-4".to_string()
}

fn default_fallback_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_ai_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| "Failed to parse configuration file")?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.ensure_jwt_secret();
        Ok(config)
    }

    /// Secrets are usually injected through the environment rather than the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("YUGA_JWT_SECRET") {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
        if let Ok(key) = std::env::var("YUGA_AI_API_KEY") {
            if !key.is_empty() {
                self.ai.api_key = Some(key);
            }
        }
    }

    fn ensure_jwt_secret(&mut self) {
        if self.auth.jwt_secret.is_empty() {
            warn!("No JWT secret configured; generating one for this process. Tokens will not survive a restart.");
            self.auth.jwt_secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
        }
    }
}
