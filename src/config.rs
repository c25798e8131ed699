//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Model used for tagging when none is given at construction.
pub const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-20250514";

/// Root of the `tmp`/`new`/`cur` directories when `MEMDIR_PATH` is unset.
pub const DEFAULT_MEMDIR_PATH: &str = "./data/memdir";

/// Entries taken per batch tick.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Seconds between inbox sweeps when running as a daemon.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Memdir configuration.
#[derive(Debug, Clone)]
pub struct MemdirConfig {
    /// Directory holding `tmp`, `new` and `cur`.
    pub root: PathBuf,
    /// Model identifier passed to the enrichment capability.
    pub default_model: String,
    /// Maximum entries processed per batch call.
    pub batch_size: usize,
    /// Upper bound on a single enrichment call. `None` waits indefinitely.
    pub enrichment_timeout: Option<Duration>,
    /// Records enriched in parallel within one batch (1 = sequential).
    pub concurrency: usize,
    /// Which LLM backend serves enrichment.
    pub backend: LlmBackend,
    /// Delay between batch ticks in daemon mode.
    pub poll_interval: Duration,
    /// Process one batch and exit instead of polling.
    pub run_once: bool,
}

impl Default for MemdirConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_MEMDIR_PATH),
            default_model: DEFAULT_LLM_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            enrichment_timeout: Some(Duration::from_secs(60)),
            concurrency: 1,
            backend: LlmBackend::Anthropic,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            run_once: false,
        }
    }
}

impl MemdirConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset keys fall back to [`MemdirConfig::default`]; set but unparseable
    /// keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("MEMDIR_PATH") {
            config.root = PathBuf::from(root);
        }
        if let Some(model) = lookup("MEMDIR_MODEL") {
            config.default_model = model;
        }
        if let Some(raw) = lookup("MEMDIR_BATCH_SIZE") {
            config.batch_size = parse_positive("MEMDIR_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("MEMDIR_CONCURRENCY") {
            config.concurrency = parse_positive("MEMDIR_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("MEMDIR_ENRICH_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "MEMDIR_ENRICH_TIMEOUT_SECS".into(),
                message: e.to_string(),
            })?;
            // 0 disables the bound
            config.enrichment_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("MEMDIR_LLM_BACKEND") {
            config.backend = match raw.trim().to_ascii_lowercase().as_str() {
                "anthropic" => LlmBackend::Anthropic,
                "openai" => LlmBackend::OpenAi,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "MEMDIR_LLM_BACKEND".into(),
                        message: format!("unknown backend '{other}' (expected anthropic or openai)"),
                    });
                }
            };
        }

        if let Some(raw) = lookup("MEMDIR_INTERVAL_SECS") {
            let secs = parse_positive("MEMDIR_INTERVAL_SECS", &raw)?;
            config.poll_interval = Duration::from_secs(secs as u64);
        }
        if let Some(raw) = lookup("MEMDIR_ONCE") {
            config.run_once = parse_bool("MEMDIR_ONCE", &raw)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected true/false or 1/0, got '{other}'"),
        }),
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
    }
}
