//! LLM integration for memdir.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The organizer never talks to a provider directly. It consumes the
//! [`StructuredGenerator`] capability, whose default implementation
//! ([`StructuredClient`]) sits on top of any [`LlmProvider`].

pub mod provider;
mod rig_adapter;
pub mod structured;

pub use provider::*;
pub use rig_adapter::{RigAdapter, RigClient};
pub use structured::{ResponseSchema, StructuredClient, StructuredGenerator};

use std::sync::Arc;

use rig::providers::{anthropic, openai};
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Environment variable holding the API key for this backend.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read the backend's API key from the environment.
    pub fn from_env(backend: LlmBackend, model: impl Into<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(backend, model, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(
        backend: LlmBackend,
        model: impl Into<String>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = backend.api_key_var();
        let api_key = lookup(var)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))?;
        Ok(Self {
            backend,
            api_key: secrecy::SecretString::from(api_key),
            model: model.into(),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

/// Create the enrichment capability from configuration.
pub fn create_structured_generator(
    config: &LlmConfig,
) -> Result<Arc<dyn StructuredGenerator>, LlmError> {
    let provider = create_provider(config)?;
    Ok(Arc::new(StructuredClient::new(provider)))
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(
        RigClient::Anthropic(client),
        &config.model,
    )))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let client = openai::CompletionsClient::builder()
        .api_key(config.api_key.expose_secret())
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: "openai".to_string(),
            reason: format!("Failed to create OpenAI client: {}", e),
        })?;

    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(RigClient::OpenAi(client), &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_missing_key_still_constructs() {
        // rig-core clients accept any string as API key at construction time.
        // The actual auth failure happens when making a request.
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "claude-3-5-sonnet-latest");
    }

    #[test]
    fn test_create_openai_provider() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "gpt-4o");
    }

    #[test]
    fn config_reads_backend_key() {
        let config = LlmConfig::from_lookup(LlmBackend::OpenAi, "gpt-4o", |key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        assert_eq!(config.api_key.expose_secret(), "sk-test");
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn config_requires_key() {
        let err = LlmConfig::from_lookup(LlmBackend::Anthropic, "m", |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(var) if var == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn api_key_vars() {
        assert_eq!(LlmBackend::Anthropic.api_key_var(), "ANTHROPIC_API_KEY");
        assert_eq!(LlmBackend::OpenAi.api_key_var(), "OPENAI_API_KEY");
    }
}
