//! Structured (JSON) generation on top of an `LlmProvider`.
//!
//! This is the enrichment capability the organizer consumes: given a prompt,
//! a model and a schema hint, return a parsed JSON object or an
//! `EnrichmentError`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::EnrichmentError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Max tokens for a structured call.
const STRUCTURED_MAX_TOKENS: u32 = 512;

/// Low temperature keeps the JSON shape stable.
const STRUCTURED_TEMPERATURE: f32 = 0.1;

/// Shape the caller expects back, rendered into the system prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    /// Short name used in logs.
    pub name: String,
    /// Example object with every expected field.
    pub shape: serde_json::Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, shape: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }
}

/// The enrichment capability.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Generate a JSON object for `prompt` using `model`, shaped like `schema`.
    async fn generate_structured_response(
        &self,
        prompt: &str,
        model: &str,
        schema: &ResponseSchema,
    ) -> Result<serde_json::Value, EnrichmentError>;
}

/// Default `StructuredGenerator`: asks an `LlmProvider` for bare JSON and
/// extracts the object from whatever comes back.
pub struct StructuredClient {
    llm: Arc<dyn LlmProvider>,
}

impl StructuredClient {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl StructuredGenerator for StructuredClient {
    async fn generate_structured_response(
        &self,
        prompt: &str,
        model: &str,
        schema: &ResponseSchema,
    ) -> Result<serde_json::Value, EnrichmentError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_structured_system_prompt(schema)),
            ChatMessage::user(prompt),
        ])
        .with_model(model)
        .with_temperature(STRUCTURED_TEMPERATURE)
        .with_max_tokens(STRUCTURED_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        debug!(
            schema = %schema.name,
            model = %model,
            output_tokens = response.output_tokens,
            "Structured response received"
        );

        parse_structured_response(&response.content).inspect_err(|e| {
            warn!(
                schema = %schema.name,
                raw_response = %response.content,
                error = %e,
                "Structured response did not parse"
            );
        })
    }
}

/// System prompt demanding a bare JSON object of the given shape.
fn build_structured_system_prompt(schema: &ResponseSchema) -> String {
    format!(
        "You produce machine-readable output.\n\n\
         Respond with ONLY a JSON object of this shape, no prose and no markdown:\n\
         {}\n\n\
         Rules:\n\
         - Include every field shown\n\
         - Use arrays of short strings where the shape shows arrays\n\
         - Never invent fields that are not shown",
        schema.shape
    )
}

/// Parse a model reply into a JSON object.
pub fn parse_structured_response(raw: &str) -> Result<serde_json::Value, EnrichmentError> {
    let json_str = extract_json_object(raw);
    let value: serde_json::Value =
        serde_json::from_str(&json_str).map_err(|e| EnrichmentError::Malformed {
            reason: format!("JSON parse error: {e}"),
        })?;
    if !value.is_object() {
        return Err(EnrichmentError::Malformed {
            reason: "response is not a JSON object".into(),
        });
    }
    Ok(value)
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    /// Records the last request and replies with a fixed string.
    struct ScriptedLlm {
        reply: Result<String, ()>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl ScriptedLlm {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                last_request: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last_request.lock().unwrap() = Some(request);
            match &self.reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 10,
                    output_tokens: 5,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "backend down".into(),
                }),
            }
        }
    }

    fn schema() -> ResponseSchema {
        ResponseSchema::new("metadata", json!({"summary": "string"}))
    }

    #[tokio::test]
    async fn passes_model_and_prompt_through() {
        let llm = ScriptedLlm::replying(r#"{"summary": "ok"}"#);
        let client = StructuredClient::new(llm.clone());
        let value = client
            .generate_structured_response("describe this", "model-x", &schema())
            .await
            .unwrap();
        assert_eq!(value, json!({"summary": "ok"}));

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.model.as_deref(), Some("model-x"));
        assert_eq!(request.prompt_text(), "describe this");
        assert!(request.system_text().contains("\"summary\""));
    }

    #[tokio::test]
    async fn provider_failure_is_llm_error() {
        let client = StructuredClient::new(ScriptedLlm::failing());
        let err = client
            .generate_structured_response("p", "m", &schema())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Llm(_)));
    }

    #[tokio::test]
    async fn prose_reply_is_malformed() {
        let client = StructuredClient::new(ScriptedLlm::replying("I cannot help with that."));
        let err = client
            .generate_structured_response("p", "m", &schema())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Malformed { .. }));
    }

    #[test]
    fn parse_accepts_fenced_json() {
        let raw = "Here you go:\n```json\n{\"summary\": \"fenced\"}\n```";
        assert_eq!(
            parse_structured_response(raw).unwrap(),
            json!({"summary": "fenced"})
        );
    }

    #[test]
    fn parse_accepts_surrounding_text() {
        let raw = "Result: {\"summary\": \"inline\"} done.";
        assert_eq!(
            parse_structured_response(raw).unwrap(),
            json!({"summary": "inline"})
        );
    }

    #[test]
    fn parse_rejects_array() {
        assert!(parse_structured_response(r#"["a", "b"]"#).is_err());
    }

    #[test]
    fn extract_json_direct_object() {
        let input = r#"{"keywords": []}"#;
        assert_eq!(extract_json_object(input), input);
    }
}
