//! rig-core backed `LlmProvider`.
//!
//! Builds a one-shot rig agent per request so the model can be overridden
//! per call. Token counts are not surfaced by `Prompt::prompt` and are
//! reported as zero.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

/// Anthropic rejects requests without an explicit token cap.
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Underlying rig client.
pub enum RigClient {
    Anthropic(rig::client::Client<anthropic::client::AnthropicExt>),
    OpenAi(openai::CompletionsClient),
}

impl RigClient {
    fn provider(&self) -> &'static str {
        match self {
            Self::Anthropic(_) => "anthropic",
            Self::OpenAi(_) => "openai",
        }
    }
}

/// Bridges a rig client to [`LlmProvider`].
pub struct RigAdapter {
    client: RigClient,
    model: String,
}

impl RigAdapter {
    pub fn new(client: RigClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for RigAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let preamble = request.system_text();
        let prompt = request.prompt_text();
        let max_tokens = request
            .max_tokens
            .map(u64::from)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        debug!(
            provider = self.client.provider(),
            model = %model,
            prompt_chars = prompt.len(),
            "Sending completion request"
        );

        let result = match &self.client {
            RigClient::Anthropic(client) => {
                let mut builder = client.agent(model).preamble(&preamble).max_tokens(max_tokens);
                if let Some(t) = request.temperature {
                    builder = builder.temperature(f64::from(t));
                }
                let agent = builder.build();
                agent.prompt(prompt.as_str()).await
            }
            RigClient::OpenAi(client) => {
                let mut builder = client.agent(model).preamble(&preamble).max_tokens(max_tokens);
                if let Some(t) = request.temperature {
                    builder = builder.temperature(f64::from(t));
                }
                let agent = builder.build();
                agent.prompt(prompt.as_str()).await
            }
        };

        let provider = self.client.provider().to_string();
        let content: String = result.map_err(|e| {
            let reason = e.to_string();
            if is_auth_failure(&reason) {
                LlmError::AuthFailed { provider: provider.clone() }
            } else {
                LlmError::RequestFailed {
                    provider: provider.clone(),
                    reason,
                }
            }
        })?;
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider,
                reason: "empty completion".into(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// rig surfaces HTTP failures as text; 401s and key errors read like this.
fn is_auth_failure(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    lower.contains("401") || lower.contains("authentication") || lower.contains("invalid x-api-key")
}
