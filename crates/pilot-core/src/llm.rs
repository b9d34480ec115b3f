use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::agent::game_api::{BoxFuture, LlmClient};
use crate::error::ServiceError;

/// Minimal config for an OpenAI-compatible `POST {base}/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL including the version prefix, e.g. `http://127.0.0.1:1234/v1`.
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl ChatConfig {
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// User turn carrying an image plus text, for vision models.
    pub fn user_with_image(text: impl Into<String>, image_data_url: String) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_data_url,
                    },
                },
            ]),
        }
    }

    /// Text view of the content, used by tests and logs.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Sends a chat completion and returns the first choice's text.
pub async fn query_chat_completion(
    client: &Client,
    cfg: &ChatConfig,
    messages: &[ChatMessage],
) -> Result<String, ServiceError> {
    let request = ChatRequest {
        model: &cfg.model,
        messages,
        stream: false,
        temperature: cfg.temperature,
    };

    let res = client
        .post(cfg.endpoint())
        .timeout(cfg.timeout)
        .json(&request)
        .send()
        .await
        .map_err(ServiceError::from_reqwest)?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(ServiceError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let body = res.bytes().await.map_err(ServiceError::from_reqwest)?;
    let parsed: ChatResponse = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::Malformed(format!("chat response decode failed: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ServiceError::Malformed("missing choices[0].message.content".to_string()))
}

/// `LlmClient` backed by an HTTP chat endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    client: Client,
    cfg: ChatConfig,
}

impl HttpLlmClient {
    pub fn new(client: Client, cfg: ChatConfig) -> Self {
        Self { client, cfg }
    }
}

impl LlmClient for HttpLlmClient {
    fn complete<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'a, Result<String, ServiceError>> {
        Box::pin(async move { query_chat_completion(&self.client, &self.cfg, &messages).await })
    }
}
