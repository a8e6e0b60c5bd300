//! OpenAI-compatible text generation.
//!
//! Works with: Qiniu, DeepSeek, OpenAI, OpenRouter, Ollama, and any endpoint
//! exposing `/chat/completions`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use voxchat_core::error::ProviderError;
use voxchat_core::message::Message;
use voxchat_core::provider::{GenerationRequest, GenerationResponse, TextGenerator, Usage};

/// Seconds to wait after a 429 when the server sends no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible text generator.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Qiniu's OpenAI-compatible LLM endpoint.
    pub fn qiniu(api_key: impl Into<String>) -> Self {
        Self::new("qiniu", "https://openai.qiniu.com/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn deepseek(api_key: impl Into<String>) -> Self {
        Self::new("deepseek", "https://api.deepseek.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    #[cfg(test)]
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }
}

/// Map non-success HTTP statuses onto [`ProviderError`].
///
/// Shared by every HTTP backend in this crate.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Backend returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Translate transport failures, keeping timeouts distinct.
pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::EmptyResponse("No choices in response".into()))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(GenerationResponse {
            text,
            model: api_response.model.unwrap_or(request.model),
            usage,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::{get, post};

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "deepseek-v3".into(),
            messages: vec![Message::system("You are Socrates."), Message::user("Hello")],
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn qiniu_constructor() {
        let provider = OpenAiCompatProvider::qiniu("sk-test");
        assert_eq!(provider.name(), "qiniu");
        assert_eq!(provider.base_url(), "https://openai.qiniu.com/v1");
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("custom", "http://host/v1/", "k");
        assert_eq!(provider.base_url(), "http://host/v1");
    }

    #[test]
    fn message_conversion_keeps_order_and_roles() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hi"),
            Message::assistant("Hello there"),
        ];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        let roles: Vec<&str> = api_messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[tokio::test]
    async fn generate_parses_first_choice() {
        let app = axum::Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["stream"], false);
                Json(serde_json::json!({
                    "model": "deepseek-v3",
                    "choices": [{"message": {"role": "assistant", "content": "What is virtue?"}}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
                }))
            }),
        );
        let base = test_server::spawn(app).await;

        let provider = OpenAiCompatProvider::new("test", base, "sk-test");
        let response = provider.generate(request()).await.unwrap();
        assert_eq!(response.text, "What is virtue?");
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }

    #[tokio::test]
    async fn empty_choices_is_empty_response() {
        let app = axum::Router::new().route(
            "/chat/completions",
            post(|| async { Json(serde_json::json!({"model": "m", "choices": []})) }),
        );
        let base = test_server::spawn(app).await;

        let provider = OpenAiCompatProvider::new("test", base, "sk-test");
        let err = provider.generate(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let app = axum::Router::new()
            .route(
                "/limited/chat/completions",
                post(|| async {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [("retry-after", "12")],
                        "slow down",
                    )
                }),
            )
            .route(
                "/denied/chat/completions",
                post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
            )
            .route(
                "/broken/chat/completions",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            );
        let base = test_server::spawn(app).await;

        let limited = OpenAiCompatProvider::new("t", format!("{base}/limited"), "k");
        assert!(matches!(
            limited.generate(request()).await,
            Err(ProviderError::RateLimited {
                retry_after_secs: 12
            })
        ));

        let denied = OpenAiCompatProvider::new("t", format!("{base}/denied"), "k");
        assert!(matches!(
            denied.generate(request()).await,
            Err(ProviderError::AuthenticationFailed(_))
        ));

        let broken = OpenAiCompatProvider::new("t", format!("{base}/broken"), "k");
        match broken.generate(request()).await {
            Err(ProviderError::ApiError {
                status_code,
                message,
            }) => {
                assert_eq!(status_code, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let provider = OpenAiCompatProvider::new("t", "http://127.0.0.1:1", "k");
        let err = provider.generate(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn health_check_probes_models() {
        let app = axum::Router::new()
            .route(
                "/up/models",
                get(|| async { Json(serde_json::json!({"data": []})) }),
            )
            .route(
                "/down/models",
                get(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
            );
        let base = test_server::spawn(app).await;

        let up = OpenAiCompatProvider::new("t", format!("{base}/up"), "k");
        assert!(up.health_check().await.unwrap());
        let down = OpenAiCompatProvider::new("t", format!("{base}/down"), "k");
        assert!(!down.health_check().await.unwrap());

        let gone = OpenAiCompatProvider::new("t", "http://127.0.0.1:1", "k");
        assert!(matches!(gone.health_check().await, Err(ProviderError::Network(_))));
    }
}
