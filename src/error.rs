//! Error types for memdir.
//!
//! Storage failures and enrichment failures travel on separate channels.
//! `OrganizerError` only ever wraps `StorageError`; an `EnrichmentError` is
//! absorbed by the organizer and never reaches a batch caller.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type, used by the host binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Organizer error: {0}")]
    Organizer(#[from] OrganizerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage engine errors.
///
/// `Read` is the recoverable per-record failure; `Write` and `Move` mean a
/// relocation did not happen and the record is still at its source.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot decode {input:?}: {reason}")]
    Decode { input: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn decode(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error leaves the record readable at its original location.
    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::Read { .. })
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the enrichment capability. All of them degrade, none abort.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Malformed structured response: {reason}")]
    Malformed { reason: String },

    #[error("Enrichment timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Failed to build enrichment prompt: {0}")]
    Prompt(String),
}

/// Hard failures of the organizer: the storage step did not complete.
#[derive(Debug, thiserror::Error)]
pub enum OrganizerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for memdir.
pub type Result<T> = std::result::Result<T, Error>;
