use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// External process invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Executable to spawn for every job.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments; every `{prompt}` is replaced with the job prompt.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Hard deadline for one job.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Default working directory (`~` is expanded).
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Repository name (`owner/repo`) → working directory.
    #[serde(default)]
    pub projects: HashMap<String, String>,
    /// Capabilities the external process must not use.
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    /// Flag preceding the disallowed list on the command line.
    #[serde(default = "default_disallowed_flag")]
    pub disallowed_tools_flag: String,
    /// Environment variables stripped from the child environment.
    #[serde(default = "default_env_remove")]
    pub env_remove: Vec<String>,
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    ["-p", "{prompt}", "--output-format", "text"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_working_dir() -> String {
    "~".to_string()
}

fn default_disallowed_flag() -> String {
    "--disallowedTools".to_string()
}

fn default_env_remove() -> Vec<String> {
    vec!["CLAUDECODE".to_string()]
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            timeout_ms: default_timeout_ms(),
            working_dir: default_working_dir(),
            projects: HashMap::new(),
            disallowed_tools: Vec::new(),
            disallowed_tools_flag: default_disallowed_flag(),
            env_remove: default_env_remove(),
        }
    }
}

/// Keyword gate applied before sensitive requests run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gate-level deadline for a yes/no confirmation.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_confirm_timeout_ms() -> u64 {
    120_000
}

fn default_keywords() -> Vec<String> {
    [
        "rm", "drop", "delete", "reset", "deploy", "push", "force", "merge", "rebase", "삭제",
        "제거", "초기화",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirm_timeout_ms: default_confirm_timeout_ms(),
            keywords: default_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron store location. Defaults to `<data_dir>/crons.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
    /// Conversation rows included in each prompt.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_log_retention_days() -> u32 {
    30
}

fn default_history_limit() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_retention_days: default_log_retention_days(),
            history_limit: default_history_limit(),
        }
    }
}

/// Top-level relaybot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Overrides `~/.relaybot` as the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Resolve the data directory (config override or `~/.relaybot`).
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(expand_home(&dir.to_string_lossy())),
            None => config_dir(),
        }
    }

    /// Resolve the cron store path.
    pub fn cron_store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.scheduler.store_path {
            Some(path) => Ok(expand_home(&path.to_string_lossy())),
            None => Ok(self.resolve_data_dir()?.join("crons.json")),
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve the relaybot config directory (~/.relaybot/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".relaybot"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.relaybot/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<RelayConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(RelayConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: RelayConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure a directory exists, returning it.
pub fn ensure_dir(dir: &Path) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(dir.to_path_buf())
}
