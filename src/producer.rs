use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProducerConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("producer returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected producer response: {0}")]
    Envelope(String),
}

impl ProducerError {
    /// Rate limiting and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        if let ProducerError::Status { status, .. } = self {
            if *status == 429 || *status >= 500 {
                return true;
            }
        }

        let text = self.to_string().to_lowercase();
        ["rate", "429", "500", "502", "503"]
            .iter()
            .any(|signature| text.contains(signature))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Anything that turns a prompt into one JSON object as text.
#[async_trait]
pub trait AnnotationProducer: Send + Sync {
    /// Recorded alongside generated rows.
    fn model_tag(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProducerError>;
}

/// Client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &ProducerConfig, api_key: &str) -> Result<Self> {
        Self::new(&config.base_url, api_key, &config.model)
    }
}

#[async_trait]
impl AnnotationProducer for OpenAiClient {
    fn model_tag(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProducerError> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            response_format: ResponseFormat,
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&ChatReq {
                model: &self.model,
                messages,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            })
            .send()
            .await
            .map_err(|err| ProducerError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProducerError::Status {
                status: status.as_u16(),
                body: normalize_err_body(&body),
            });
        }

        let response = response
            .json::<ChatResp>()
            .await
            .map_err(|err| ProducerError::Envelope(err.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ProducerError::Envelope("no message content in choices".to_string()))
    }
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let error = json.get("error");
        if let Some(message) = error
            .and_then(|e| e.get("message"))
            .or(error)
            .and_then(|v| v.as_str())
        {
            return message.to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, body: &str) -> ProducerError {
        ProducerError::Status {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert!(status(429, "slow down").is_retryable());
        assert!(status(500, "").is_retryable());
        assert!(status(503, "overloaded").is_retryable());
        assert!(ProducerError::Transport("Rate limit reached".to_string()).is_retryable());
        assert!(ProducerError::Transport("upstream said 502".to_string()).is_retryable());
    }

    #[test]
    fn client_errors_are_fatal() {
        assert!(!status(401, "invalid api key").is_retryable());
        assert!(!status(400, "bad request").is_retryable());
        assert!(!ProducerError::Transport("connection refused".to_string()).is_retryable());
    }

    #[test]
    fn error_bodies_are_normalized() {
        assert_eq!(normalize_err_body("   "), "<empty body>");
        assert_eq!(
            normalize_err_body(r#"{"error": {"message": "quota exceeded", "type": "x"}}"#),
            "quota exceeded"
        );
        assert_eq!(normalize_err_body(r#"{"error": "plain"}"#), "plain");
        assert_eq!(normalize_err_body("gateway timeout"), "gateway timeout");
    }
}
