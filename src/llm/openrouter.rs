//! OpenRouter chat-completions transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::{LlmConfig, LlmProvider};

const PROVIDER: &str = "openrouter";

/// Chat completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Attribution headers OpenRouter shows on its dashboard.
const REFERER: &str = "https://github.com/clean-newsletters";
const TITLE: &str = "Clean Newsletters";

/// OpenRouter-backed `LlmProvider`.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: OPENROUTER_URL.to_string(),
            timeout: config.timeout,
        })
    }

    /// Point the provider at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            }),
            s if !s.is_success() => Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {s}: {}", error_message(&body)),
            }),
            _ => parse_chat_response(&body),
        }
    }
}

impl OpenRouterProvider {
    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                provider: PROVIDER.to_string(),
                timeout: self.timeout,
            }
        } else {
            LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Extract the first choice's text from a successful response body.
fn parse_chat_response(body: &str) -> Result<String, LlmError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("failed to decode response: {e}"),
        })?;

    if let Some(error) = response.error {
        return Err(LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("API error: {}", error.message),
        });
    }

    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "no response choices returned".to_string(),
        })
}

/// Best-effort error text from a failed response body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ChatResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| e.message)
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_first_choice() {
        let body = r#"{"id":"gen-1","choices":[{"message":{"role":"assistant","content":"YES"}},{"message":{"role":"assistant","content":"NO"}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "YES");
    }

    #[test]
    fn parse_api_error_body() {
        let body = r#"{"error":{"message":"Model not found","code":404}}"#;
        let err = parse_chat_response(body).unwrap_err();
        match err {
            LlmError::RequestFailed { reason, .. } => assert!(reason.contains("Model not found")),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }

    #[test]
    fn parse_empty_choices() {
        let err = parse_chat_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn parse_null_content_is_empty_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "");
    }

    #[test]
    fn parse_garbage_body() {
        let err = parse_chat_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn error_message_prefers_api_error() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Insufficient credits"}}"#),
            "Insufficient credits"
        );
        assert_eq!(error_message("upstream down"), "upstream down");
    }

    #[test]
    fn request_serializes_single_user_message() {
        let request = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let config = LlmConfig {
            api_key: SecretString::from("sk-or-test"),
            model: "m".to_string(),
            timeout: Duration::from_secs(2),
        };
        let provider = OpenRouterProvider::new(&config)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/v1/chat/completions");
        let err = provider.complete("hello").await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::RequestFailed { .. } | LlmError::Timeout { .. }
        ));
    }
}
