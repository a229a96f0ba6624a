//! Groq chat-completions client (OpenAI-compatible wire format).
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatModel, LlmError};
use crate::config::LlmConfig;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct GroqClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl GroqClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Pull the human-readable message out of an OpenAI-style error body,
/// falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn classify(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    let message = error_message(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            retry_after,
            message,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        _ => LlmError::Provider {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::MissingCredential);
        }

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let url = self.endpoint();
        debug!("POST {url} (model {})", self.model);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            return Err(classify(status, retry_after, &text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use serde_json::{Value, json};

    /// Serve `router` on an ephemeral local port and return its base URL.
    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str, key: &str) -> GroqClient {
        let config = LlmConfig {
            base_url: base_url.to_string(),
            ..LlmConfig::default()
        };
        GroqClient::new(&config, key)
    }

    #[test]
    fn test_classify_status() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, Some(7), "").is_rate_limited());
        assert!(classify(StatusCode::UNAUTHORIZED, None, "").is_credential_error());
        assert!(classify(StatusCode::FORBIDDEN, None, "").is_credential_error());
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, None, "upstream"),
            LlmError::Provider { status: 502, .. }
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"message":"Rate limit reached for model","type":"tokens"}}"#;
        assert_eq!(error_message(body), "Rate limit reached for model");
        assert_eq!(error_message("plain text\n"), "plain text");
    }

    #[tokio::test]
    async fn test_complete_success() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("authorization").unwrap().to_str().unwrap(),
                    "Bearer test-key"
                );
                assert_eq!(body["model"], "llama-3.3-70b-versatile");
                assert_eq!(body["messages"][0]["role"], "user");
                assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
                let question = body["messages"][0]["content"].as_str().unwrap().to_string();
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": format!("echo: {question}")}}]
                }))
            }),
        );
        let base = spawn_mock(router).await;

        let reply = client(&base, "test-key").complete("hello").await.unwrap();
        assert_eq!(reply, "echo: hello");
    }

    #[tokio::test]
    async fn test_complete_rate_limited() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    AxumStatus::TOO_MANY_REQUESTS,
                    [("retry-after", "12")],
                    Json(json!({"error": {"message": "Rate limit reached"}})),
                )
                    .into_response()
            }),
        );
        let base = spawn_mock(router).await;

        let err = client(&base, "k").complete("q").await.unwrap_err();
        assert_eq!(
            err,
            LlmError::RateLimited {
                retry_after: Some(12),
                message: "Rate limit reached".into()
            }
        );
    }

    #[tokio::test]
    async fn test_complete_unauthorized() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (AxumStatus::UNAUTHORIZED, "Invalid API Key").into_response() }),
        );
        let base = spawn_mock(router).await;

        let err = client(&base, "bad").complete("q").await.unwrap_err();
        assert!(err.is_credential_error());
    }

    #[tokio::test]
    async fn test_complete_server_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "oops").into_response() }),
        );
        let base = spawn_mock(router).await;

        let err = client(&base, "k").complete("q").await.unwrap_err();
        assert_eq!(
            err,
            LlmError::Provider {
                status: 500,
                message: "oops".into()
            }
        );
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_complete_no_choices() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let base = spawn_mock(router).await;

        let err = client(&base, "k").complete("q").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_empty_key_fails_before_request() {
        // Nothing listens here; the key check must short-circuit.
        let err = client("http://127.0.0.1:9", "  ").complete("q").await.unwrap_err();
        assert_eq!(err, LlmError::MissingCredential);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"), "k")
            .complete("q")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
