//! OpenRouter chat-completions provider.
//!
//! Agent calls go through OpenRouter's OpenAI-compatible endpoint. Replies
//! are requested as JSON objects; content is accepted as a plain string, a
//! list of text parts, or (for reasoning models) the reasoning field when the
//! content is empty.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};

/// Default OpenRouter API endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model used when the request does not name one.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Maximum number of attempts for transient failures.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 300;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenRouter provider for agent calls.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("api_key", &self.api_key_masked())
            .finish()
    }
}

impl OpenRouterProvider {
    /// Create a provider with the default model and base URL.
    pub fn new(api_key: String) -> Self {
        Self::with_custom_url(
            api_key,
            OPENROUTER_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
        )
    }

    /// Create a provider with a specific default model.
    pub fn with_model(api_key: String, model: String) -> Self {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL.to_string(), model)
    }

    /// Create a provider against an OpenRouter-compatible base URL.
    pub fn with_custom_url(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: model,
        }
    }

    /// Create a provider from `OPENROUTER_API_KEY` / `OPENROUTER_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENROUTER_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| OPENROUTER_BASE_URL.to_string());
        Ok(Self::with_custom_url(api_key, base_url, model.into()))
    }

    /// API key with the middle masked out.
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn execute_with_retry(&self, request: &ApiRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.execute_request(&url, request).await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient_error(&err) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = MAX_ATTEMPTS,
                        model = %request.model,
                        error = %err,
                        "Transient OpenRouter error, will retry"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
        }))
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &ApiRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let http_response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "negot-sim")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            let code = status.as_u16();
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or(body);
            if code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError { code, message });
        }

        // OpenRouter reports upstream failures with a 200 and an `error` body.
        if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&body) {
            return Err(LlmError::ApiError {
                code: error_response.error.code.unwrap_or(502),
                message: error_response.error.message,
            });
        }

        let api_response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let mut choices = Vec::with_capacity(api_response.choices.len());
        for choice in api_response.choices {
            let content = message_content(&choice.message);
            choices.push(Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role.unwrap_or_else(|| "assistant".to_string()),
                    content,
                },
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            });
        }

        if choices.iter().all(|c| c.message.content.trim().is_empty()) {
            return Err(LlmError::EmptyResponse);
        }

        Ok(GenerationResponse {
            id: api_response.id.unwrap_or_default(),
            model: api_response.model.unwrap_or_else(|| request.model.clone()),
            choices,
            usage: api_response.usage,
        })
    }
}

/// Flattens the various content shapes OpenRouter models return.
fn message_content(message: &ApiMessage) -> String {
    let text = match &message.content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => ["text", "content", "value"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect::<String>(),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };

    if !text.trim().is_empty() {
        return text;
    }
    message.reasoning.clone().unwrap_or_default()
}

/// Check if an error is transient and should be retried.
fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("temporarily")
        }
        LlmError::RateLimited(_) | LlmError::EmptyResponse => true,
        LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_output
                .then(|| ResponseFormat { kind: "json_object" }),
        };

        self.execute_with_retry(&api_request).await
    }

    fn model_name(&self) -> &str {
        &self.default_model
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_message(value: Value) -> ApiMessage {
        serde_json::from_value(value).expect("valid message")
    }

    #[test]
    fn test_provider_defaults() {
        let provider = OpenRouterProvider::new("test-api-key".to_string());

        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(provider.api_key_masked(), "test...-key");
    }

    #[test]
    fn test_custom_url_trims_trailing_slash() {
        let provider = OpenRouterProvider::with_custom_url(
            "abc".to_string(),
            "https://proxy.internal/v1/".to_string(),
            "m".to_string(),
        );
        assert_eq!(provider.base_url(), "https://proxy.internal/v1");
        assert_eq!(provider.api_key_masked(), "***");
    }

    #[test]
    fn test_message_content_string() {
        let msg = api_message(json!({"role": "assistant", "content": "{\"a\":1}"}));
        assert_eq!(message_content(&msg), "{\"a\":1}");
    }

    #[test]
    fn test_message_content_parts() {
        let msg = api_message(json!({
            "content": [{"type": "text", "text": "{\"a\":"}, {"type": "text", "text": "1}"}]
        }));
        assert_eq!(message_content(&msg), "{\"a\":1}");
    }

    #[test]
    fn test_message_content_falls_back_to_reasoning() {
        let msg = api_message(json!({"content": "", "reasoning": "{\"outcome\":\"PASS\"}"}));
        assert_eq!(message_content(&msg), "{\"outcome\":\"PASS\"}");
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient_error(&LlmError::RateLimited("slow down".into())));
        assert!(is_transient_error(&LlmError::ApiError {
            code: 503,
            message: "unavailable".into()
        }));
        assert!(is_transient_error(&LlmError::RequestFailed(
            "operation timed out".into()
        )));
        assert!(!is_transient_error(&LlmError::ApiError {
            code: 400,
            message: "bad request".into()
        }));
        assert!(!is_transient_error(&LlmError::ParseError("nope".into())));
    }

    #[test]
    fn test_api_request_serialization() {
        let request = ApiRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("Hello")],
            temperature: Some(0.0),
            max_tokens: None,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"test-model\""));
        assert!(json.contains("\"response_format\":{\"type\":\"json_object\"}"));
        assert!(!json.contains("max_tokens"));
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let provider = OpenRouterProvider::with_custom_url(
            "test-key".to_string(),
            "http://127.0.0.1:9".to_string(),
            "test-model".to_string(),
        );

        let request = GenerationRequest::new("", vec![Message::user("test")]);
        let result = provider.generate(request).await;

        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
