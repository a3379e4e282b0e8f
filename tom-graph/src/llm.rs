//! Structured-output LLM seam and its OpenAI-compatible binding.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tom_core::{GraphSettings, ModelTier, TierModels};

use crate::errors::GraphError;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("No content in response")]
    NoContent,
    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LlmError> for GraphError {
    fn from(value: LlmError) -> Self {
        GraphError::ExtractionFailed(value.to_string())
    }
}

/// A model call whose output is a JSON object matching `schema`.
#[async_trait::async_trait]
pub trait StructuredLlm: Send + Sync {
    async fn structured_prompt(
        &self,
        prompt: &str,
        schema: &Value,
        tier: ModelTier,
    ) -> Result<Value, LlmError>;
}

/// Chat-completions client using `response_format: json_schema`.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    models: TierModels,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    r#type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

const SYSTEM_PROMPT: &str =
    "You extract structured data from text. Reply only with JSON matching the schema.";

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        models: TierModels,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key,
            models,
            base_url: base_url.into(),
        })
    }

    pub fn from_settings(
        settings: &GraphSettings,
        api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        Self::new(
            settings.llm_base_url.clone(),
            api_key,
            settings.llm_models.clone(),
            Duration::from_secs(settings.llm_timeout_seconds),
        )
    }

    pub fn model(&self, tier: ModelTier) -> &str {
        self.models.model_for(tier)
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let auth_value = format!("Bearer {}", api_key);
            if let Ok(header_value) = HeaderValue::from_str(&auth_value) {
                headers.insert(AUTHORIZATION, header_value);
            }
        }
        headers
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

/// Pull the JSON object out of a completion body.
fn parse_completion(body: &str) -> Result<Value, LlmError> {
    let response: ChatCompletionsResponse = serde_json::from_str(body).map_err(|e| {
        let preview = body
            .char_indices()
            .nth(500)
            .map_or(body, |(end, _)| &body[..end]);
        LlmError::InvalidFormat(format!(
            "Failed to parse chat completion: {e}\nBody preview: {preview}"
        ))
    })?;

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or(LlmError::NoContent)?;
    if let Some(refusal) = message.refusal {
        return Err(LlmError::InvalidFormat(format!("model refused: {refusal}")));
    }
    let content = message
        .content
        .filter(|text| !text.trim().is_empty())
        .ok_or(LlmError::NoContent)?;

    let value: Value = serde_json::from_str(strip_code_fence(&content))?;
    if !value.is_object() {
        return Err(LlmError::InvalidFormat(format!(
            "expected a JSON object, got {value}"
        )));
    }
    Ok(value)
}

/// Some compatible servers wrap JSON output in a markdown fence.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait::async_trait]
impl StructuredLlm for OpenAiCompatibleClient {
    async fn structured_prompt(
        &self,
        prompt: &str,
        schema: &Value,
        tier: ModelTier,
    ) -> Result<Value, LlmError> {
        let model = self.model(tier);
        let request_body = ChatCompletionsRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                r#type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "extraction",
                    strict: true,
                    schema,
                },
            },
            temperature: 0.0,
        };

        tracing::debug!(model, %tier, "structured prompt");
        let response = self
            .http_client
            .post(self.chat_completions_url())
            .headers(self.build_headers())
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body = response.text().await?;
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(
            base_url,
            None,
            TierModels::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_chat_completions_url_without_v1_suffix() {
        assert_eq!(
            client("http://127.0.0.1:8080/").chat_completions_url(),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_chat_completions_url_with_v1_suffix() {
        assert_eq!(
            client("http://127.0.0.1:8080/v1").chat_completions_url(),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_model_per_tier() {
        let client = client("http://localhost");
        assert_eq!(client.model(ModelTier::Fast), "gpt-4o-mini");
        assert_eq!(client.model(ModelTier::Best), "gpt-4.1");
    }

    #[test]
    fn test_parse_completion_object() {
        let body = r#"{"choices":[{"message":{"content":"{\"entities\":[]}"}}]}"#;
        assert_eq!(
            parse_completion(body).unwrap(),
            serde_json::json!({"entities": []})
        );
    }

    #[test]
    fn test_parse_completion_fenced() {
        let body = r#"{"choices":[{"message":{"content":"```json\n{\"a\":1}\n```"}}]}"#;
        assert_eq!(parse_completion(body).unwrap()["a"], 1);
    }

    #[test]
    fn test_parse_completion_errors() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(LlmError::NoContent)
        ));
        assert!(matches!(
            parse_completion(r#"{"choices":[{"message":{"content":"[1,2]"}}]}"#),
            Err(LlmError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_completion("not json"),
            Err(LlmError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices":[{"message":{"content":null,"refusal":"no"}}]}"#),
            Err(LlmError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_llm_error_maps_to_extraction_failed() {
        let err: GraphError = LlmError::NoContent.into();
        assert!(matches!(err, GraphError::ExtractionFailed(_)));
    }
}
