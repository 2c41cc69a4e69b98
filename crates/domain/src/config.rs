use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chat::ModelSelection;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Env var holding the observer bearer token. Empty value = dev mode.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    #[serde(default = "d_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_token_env(),
            allowed_origins: d_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data roots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "d_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "d_outputs_dir")]
    pub outputs_dir: PathBuf,
    #[serde(default = "d_conversations_dir")]
    pub conversations_dir: PathBuf,
    #[serde(default = "d_tasks_db")]
    pub tasks_db: PathBuf,
}

impl PathsConfig {
    /// Roots that file tools are allowed to touch.
    pub fn allowed_roots(&self) -> Vec<PathBuf> {
        vec![
            self.data_dir.clone(),
            self.uploads_dir.clone(),
            self.outputs_dir.clone(),
        ]
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            uploads_dir: d_uploads_dir(),
            outputs_dir: d_outputs_dir(),
            conversations_dir: d_conversations_dir(),
            tasks_db: d_tasks_db(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    /// Env var holding the provider API key.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    /// Pass-through attribution headers (HTTP-Referer / X-Title).
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default = "d_primary_model")]
    pub primary_model: String,
    #[serde(default = "d_secondary_model")]
    pub secondary_model: String,
    /// Defaults to the secondary model when unset.
    #[serde(default)]
    pub tertiary_model: Option<String>,

    #[serde(default = "d_primary_timeout")]
    pub primary_timeout_sec: u64,
    #[serde(default = "d_secondary_timeout")]
    pub secondary_timeout_sec: u64,
    #[serde(default)]
    pub tertiary_timeout_sec: Option<u64>,

    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,

    /// Model-id markers for providers that cannot honor native tool schemas;
    /// matching models get tool schemas in the system prompt instead.
    #[serde(default = "d_text_tool_markers")]
    pub text_tool_markers: Vec<String>,

    /// Model used by the web_search tool (`:online` activates provider-side
    /// web search).
    #[serde(default = "d_search_model")]
    pub search_model: String,
    /// Heavyweight model used by the call_external_model tool.
    #[serde(default = "d_external_model")]
    pub external_model: String,
}

impl LlmConfig {
    pub fn default_selection(&self) -> ModelSelection {
        ModelSelection {
            primary: self.primary_model.clone(),
            secondary: self.secondary_model.clone(),
            tertiary: self
                .tertiary_model
                .clone()
                .unwrap_or_else(|| self.secondary_model.clone()),
        }
    }

    /// Per-tier timeouts in seconds, tertiary falling back to secondary.
    pub fn tier_timeouts(&self) -> (u64, u64, u64) {
        (
            self.primary_timeout_sec,
            self.secondary_timeout_sec,
            self.tertiary_timeout_sec
                .unwrap_or(self.secondary_timeout_sec),
        )
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            api_key_env: d_llm_key_env(),
            referer: None,
            title: None,
            primary_model: d_primary_model(),
            secondary_model: d_secondary_model(),
            tertiary_model: None,
            primary_timeout_sec: d_primary_timeout(),
            secondary_timeout_sec: d_secondary_timeout(),
            tertiary_timeout_sec: None,
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            text_tool_markers: d_text_tool_markers(),
            search_model: d_search_model(),
            external_model: d_external_model(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "d_sandbox_image")]
    pub image: String,
    /// Interpreter base image used when the sandbox image cannot be pulled.
    #[serde(default = "d_fallback_image")]
    pub fallback_image: String,
    /// Env var with the absolute host path bind-mounted into every session.
    #[serde(default = "d_host_data_env")]
    pub host_data_env: String,
    /// Mount point inside the session; also the working directory.
    #[serde(default = "d_data_mount")]
    pub data_mount: String,
    #[serde(default = "d_shm_size_mb")]
    pub shm_size_mb: u64,
}

impl SandboxConfig {
    /// Resolve the host side of the bind mount: env override first,
    /// falling back to the configured data dir.
    pub fn host_data_dir(&self, paths: &PathsConfig) -> PathBuf {
        match std::env::var(&self.host_data_env) {
            Ok(v) if !v.is_empty() => PathBuf::from(v),
            _ => paths.data_dir.clone(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: d_sandbox_image(),
            fallback_image: d_fallback_image(),
            host_data_env: d_host_data_env(),
            data_mount: d_data_mount(),
            shm_size_mb: d_shm_size_mb(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Hard cap applied to caller-supplied command timeouts.
    #[serde(default = "d_max_exec_sec")]
    pub max_execution_sec: u64,
    #[serde(default = "d_default_shell_sec")]
    pub default_shell_timeout_sec: u64,
    #[serde(default = "d_default_script_sec")]
    pub default_script_timeout_sec: u64,
    /// Truncation applied to tool output broadcast to observers; the model
    /// always receives the full output.
    #[serde(default = "d_broadcast_chars")]
    pub broadcast_max_chars: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_execution_sec: d_max_exec_sec(),
            default_shell_timeout_sec: d_default_shell_sec(),
            default_script_timeout_sec: d_default_script_sec(),
            broadcast_max_chars: d_broadcast_chars(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "d_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "d_cleanup_interval_sec")]
    pub cleanup_interval_sec: u64,
    /// Terminal tasks older than this many hours are deleted by cleanup.
    #[serde(default = "d_retention_hours")]
    pub retention_hours: i64,
    #[serde(default = "d_shutdown_grace_sec")]
    pub shutdown_grace_sec: u64,
    #[serde(default = "d_max_iterations")]
    pub max_iterations: usize,
}

impl WorkerConfig {
    /// Clamp settings into safe operating ranges.
    pub fn clamped(&self) -> Self {
        Self {
            max_concurrent_tasks: self.max_concurrent_tasks.clamp(1, 20),
            poll_interval_ms: self.poll_interval_ms.clamp(100, 60_000),
            cleanup_interval_sec: self.cleanup_interval_sec.max(60),
            retention_hours: self.retention_hours.max(1),
            shutdown_grace_sec: self.shutdown_grace_sec,
            max_iterations: self.max_iterations.clamp(1, 1_000),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: d_max_concurrent(),
            poll_interval_ms: d_poll_interval_ms(),
            cleanup_interval_sec: d_cleanup_interval_sec(),
            retention_hours: d_retention_hours(),
            shutdown_grace_sec: d_shutdown_grace_sec(),
            max_iterations: d_max_iterations(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval store collaborator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Empty URL disables the collaborator (no-op client).
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "d_retrieval_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: d_retrieval_timeout_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-user rate limiting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_rpm")]
    pub requests_per_minute: usize,
    #[serde(default = "d_rph")]
    pub requests_per_hour: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: d_rpm(),
            requests_per_hour: d_rph(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let warn = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            message: msg,
        };
        let err = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            message: msg,
        };

        if self.llm.primary_model.is_empty() {
            issues.push(err("llm.primary_model must not be empty".into()));
        }
        if self.llm.secondary_model.is_empty() {
            issues.push(err("llm.secondary_model must not be empty".into()));
        }
        if !self.llm.base_url.starts_with("http") {
            issues.push(err(format!(
                "llm.base_url does not look like a URL: {}",
                self.llm.base_url
            )));
        }
        if std::env::var(&self.llm.api_key_env)
            .map(|v| v.is_empty())
            .unwrap_or(true)
        {
            issues.push(warn(format!(
                "{} is not set — model calls will be rejected by the provider",
                self.llm.api_key_env
            )));
        }
        if self.worker.max_concurrent_tasks == 0 {
            issues.push(warn(
                "worker.max_concurrent_tasks is 0 — clamped up to 1".into(),
            ));
        }
        if self.retrieval.base_url.is_empty() {
            issues.push(warn(
                "retrieval.base_url is empty — retrieval context disabled".into(),
            ));
        }
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8000
}
fn d_token_env() -> String {
    "HERMES_API_TOKEN".into()
}
fn d_origins() -> Vec<String> {
    vec!["*".into()]
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_uploads_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}
fn d_outputs_dir() -> PathBuf {
    PathBuf::from("./data/outputs")
}
fn d_conversations_dir() -> PathBuf {
    PathBuf::from("./data/conversations")
}
fn d_tasks_db() -> PathBuf {
    PathBuf::from("./data/tasks.db")
}
fn d_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn d_llm_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn d_primary_model() -> String {
    "openai/gpt-5-nano".into()
}
fn d_secondary_model() -> String {
    "openai/gpt-4.1-nano".into()
}
fn d_primary_timeout() -> u64 {
    180
}
fn d_secondary_timeout() -> u64 {
    300
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_text_tool_markers() -> Vec<String> {
    vec!["gemma3-tools".into()]
}
fn d_search_model() -> String {
    "deepseek/deepseek-chat-v3-0324:online".into()
}
fn d_external_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn d_sandbox_image() -> String {
    "hermes-sandbox:latest".into()
}
fn d_fallback_image() -> String {
    "python:3.11-slim".into()
}
fn d_host_data_env() -> String {
    "HOST_DATA_DIR".into()
}
fn d_data_mount() -> String {
    "/app/data".into()
}
fn d_shm_size_mb() -> u64 {
    512
}
fn d_max_exec_sec() -> u64 {
    300
}
fn d_default_shell_sec() -> u64 {
    30
}
fn d_default_script_sec() -> u64 {
    60
}
fn d_broadcast_chars() -> usize {
    500
}
fn d_max_concurrent() -> usize {
    5
}
fn d_poll_interval_ms() -> u64 {
    1_000
}
fn d_cleanup_interval_sec() -> u64 {
    3_600
}
fn d_retention_hours() -> i64 {
    24
}
fn d_shutdown_grace_sec() -> u64 {
    30
}
fn d_max_iterations() -> usize {
    200
}
fn d_retrieval_timeout_ms() -> u64 {
    8_000
}
fn d_rpm() -> usize {
    30
}
fn d_rph() -> usize {
    300
}
