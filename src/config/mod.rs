//! Configuration loading and management.
//!
//! Loads engine configuration from `./straylight.toml` (or
//! `$STRAYLIGHT_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::RiskLevel;

// ── Top-level config ────────────────────────────────────────────

/// Top-level engine configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pipeline behavior (`[pipeline]`).
    pub pipeline: PipelineConfig,
    /// Safety policy knobs (`[safety]`).
    pub safety: SafetyPolicy,
    /// Command validator lists (`[commands]`).
    pub commands: CommandPolicy,
    /// Model provider endpoint (`[model]`).
    pub model: ModelConfig,
}

impl RuntimeConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$STRAYLIGHT_CONFIG_PATH` or `./straylight.toml`.
    /// A missing file falls back to defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file(None)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from an explicit path, then apply env overrides.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let mut config = Self::load_from_file(Some(path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    fn load_from_file(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: RuntimeConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(RuntimeConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("STRAYLIGHT_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("straylight.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("STRAYLIGHT_CACHE_DURATION_MS") {
            match v.parse() {
                Ok(n) => self.pipeline.cache_duration_ms = n,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_CACHE_DURATION_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("STRAYLIGHT_ENABLE_MEMORY") {
            self.pipeline.enable_memory = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env("STRAYLIGHT_MODEL_URL") {
            self.model.base_url = v;
        }
        if let Some(v) = env("STRAYLIGHT_MODEL_NAME") {
            self.model.model = v;
        }
    }
}

// ── Pipeline config ─────────────────────────────────────────────

/// Pipeline behavior settings (`[pipeline]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Whether the memory retrieval and memory update stages run.
    pub enable_memory: bool,
    /// User propagated to memory saves.
    pub user_id: Option<String>,
    /// Session propagated to memory saves.
    pub session_id: Option<String>,
    /// Lifetime of executor cache entries in milliseconds. Zero disables
    /// the cache.
    pub cache_duration_ms: u64,
    /// Whether the default tool capabilities are registered at startup.
    pub auto_register_tools: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_memory: true,
            user_id: None,
            session_id: None,
            cache_duration_ms: 60_000,
            auto_register_tools: true,
        }
    }
}

// ── Safety policy ───────────────────────────────────────────────

/// Safety engine knobs (`[safety]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Whether destructive filesystem operations (delete) may run at all.
    pub allow_destructive_ops: bool,
    /// Minimum plan risk that forces a confirmation step.
    pub require_confirmation_threshold: RiskLevel,
    /// Tool names that are refused outright.
    pub blocked_tools: Vec<String>,
    /// Path prefixes no fs step may touch.
    pub blocked_paths: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            allow_destructive_ops: false,
            require_confirmation_threshold: RiskLevel::Medium,
            blocked_tools: Vec::new(),
            blocked_paths: vec![
                "/System".to_owned(),
                "/usr/bin".to_owned(),
                "/bin".to_owned(),
                "/sbin".to_owned(),
                "C:\\Windows\\System32".to_owned(),
                "C:\\Windows\\SysWOW64".to_owned(),
            ],
        }
    }
}

// ── Command policy ──────────────────────────────────────────────

/// Command validator lists (`[commands]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandPolicy {
    /// Regexes a command must match one of, when non-empty.
    pub whitelist: Vec<String>,
    /// Regexes that deny a command outright.
    pub blacklist: Vec<String>,
}

// ── Model config ────────────────────────────────────────────────

/// Model provider endpoint settings (`[model]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the local chat endpoint.
    pub base_url: String,
    /// Model name passed to the endpoint.
    pub model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_owned(),
            model: "llama3".to_owned(),
        }
    }
}
