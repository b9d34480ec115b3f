use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::game_api::{BoxFuture, Grounder};
use super::wire::MAX_TARGET_CHARS;
use crate::error::{GroundingError, ServiceError};
use crate::llm::{ChatConfig, ChatMessage, query_chat_completion};
use crate::vision::Frame;

/// Where the vision model thinks a target is, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroundingResult {
    Found {
        x: u32,
        y: u32,
        confidence: Option<f32>,
    },
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingProtocol {
    /// `POST /locate` and `POST /ask` with JSON bodies.
    #[default]
    Json,
    /// Chat completion against a pointing model that answers with `<point x=".." y="..">` in
    /// percent of the image size.
    PointChat,
}

#[derive(Debug, Clone)]
pub struct GroundingConfig {
    pub base_url: String,
    /// Only used by `PointChat`.
    pub model: String,
    pub protocol: GroundingProtocol,
    pub timeout: Duration,
}

const POINT_SYSTEM_PROMPT: &str = "You are a helpful assistant playing the game Minecraft. \
Given an object, you need to point it out. \
Only point out one instance of the object, even if there are multiple. \
Prefer the nearest instance unless otherwise specified.";

const ASK_SYSTEM_PROMPT: &str = "You are a helpful assistant playing the game Minecraft. \
Answer questions about the screenshot briefly and concretely.";

static POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"x1?\s*=\s*"([^"]+)"\s+y1?\s*=\s*"([^"]+)""#).expect("valid point regex")
});

/// Parses the first `<point>`/`<points>` coordinate from a pointing-model reply and converts it
/// from percent to pixels of `frame`.
pub fn parse_point_reply(reply: &str, frame: &Frame) -> GroundingResult {
    let Some(caps) = POINT_RE.captures(reply) else {
        return GroundingResult::NotFound;
    };
    let (Ok(px), Ok(py)) = (caps[1].trim().parse::<f32>(), caps[2].trim().parse::<f32>()) else {
        return GroundingResult::NotFound;
    };
    let in_range = |v: f32| v.is_finite() && (0.0..=100.0).contains(&v);
    if !in_range(px) || !in_range(py) {
        return GroundingResult::NotFound;
    }
    let x = ((px / 100.0) * frame.width as f32).round() as u32;
    let y = ((py / 100.0) * frame.height as f32).round() as u32;
    GroundingResult::Found {
        x: x.min(frame.width - 1),
        y: y.min(frame.height - 1),
        confidence: None,
    }
}

#[derive(Debug, Deserialize)]
struct LocateResponse {
    #[serde(default)]
    found: Option<bool>,
    #[serde(default)]
    coordinate: Option<Vec<f64>>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    answer: String,
}

fn interpret_locate(resp: LocateResponse, frame: &Frame) -> Result<GroundingResult, ServiceError> {
    if resp.found == Some(false) {
        return Ok(GroundingResult::NotFound);
    }
    let Some(coord) = resp.coordinate else {
        return Ok(GroundingResult::NotFound);
    };
    let [x, y] = coord.as_slice() else {
        return Err(ServiceError::Malformed(format!(
            "coordinate must have two elements, got {}",
            coord.len()
        )));
    };
    let (x, y) = (*x as f32, *y as f32);
    if !frame.contains(x, y) {
        debug!(x, y, width = frame.width, height = frame.height, "grounding.out_of_bounds");
        return Ok(GroundingResult::NotFound);
    }
    Ok(GroundingResult::Found {
        x: x.floor() as u32,
        y: y.floor() as u32,
        confidence: resp.confidence,
    })
}

fn validate_description(description: &str) -> Result<&str, GroundingError> {
    let d = description.trim();
    if d.is_empty() {
        return Err(GroundingError::InvalidDescription("description is empty".to_string()));
    }
    if d.chars().count() > MAX_TARGET_CHARS {
        return Err(GroundingError::InvalidDescription(format!(
            "description longer than {MAX_TARGET_CHARS} chars"
        )));
    }
    Ok(d)
}

/// HTTP client for the vision-language model service.
#[derive(Debug, Clone)]
pub struct GroundingClient {
    client: Client,
    cfg: GroundingConfig,
}

impl GroundingClient {
    pub fn new(client: Client, cfg: GroundingConfig) -> Self {
        Self { client, cfg }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.cfg.base_url.trim_end_matches('/'))
    }

    fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            base_url: self.cfg.base_url.clone(),
            model: self.cfg.model.clone(),
            temperature: None,
            timeout: self.cfg.timeout,
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ServiceError> {
        let res = self
            .client
            .post(self.url(path))
            .timeout(self.cfg.timeout)
            .json(&body)
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
        let bytes = res.bytes().await.map_err(ServiceError::from_reqwest)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::Malformed(format!("{path} response decode failed: {e}")))
    }

    pub async fn locate(
        &self,
        frame: &Frame,
        description: &str,
    ) -> Result<GroundingResult, GroundingError> {
        let description = validate_description(description)?;
        let result = match self.cfg.protocol {
            GroundingProtocol::Json => {
                let resp: LocateResponse = self
                    .post_json(
                        "locate",
                        json!({
                            "image": frame.to_base64(),
                            "format": frame.format_name(),
                            "description": description,
                        }),
                    )
                    .await?;
                interpret_locate(resp, frame)?
            }
            GroundingProtocol::PointChat => {
                let messages = [
                    ChatMessage::system(POINT_SYSTEM_PROMPT),
                    ChatMessage::user_with_image(
                        format!("Point out the following: {description}."),
                        frame.data_url(),
                    ),
                ];
                let reply =
                    query_chat_completion(&self.client, &self.chat_config(), &messages).await?;
                parse_point_reply(&reply, frame)
            }
        };
        debug!(description, ?result, "grounding.located");
        Ok(result)
    }

    pub async fn ask(&self, frame: &Frame, question: &str) -> Result<String, GroundingError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GroundingError::InvalidDescription("question is empty".to_string()));
        }
        match self.cfg.protocol {
            GroundingProtocol::Json => {
                let resp: AskResponse = self
                    .post_json(
                        "ask",
                        json!({
                            "image": frame.to_base64(),
                            "question": question,
                        }),
                    )
                    .await?;
                Ok(resp.answer.trim().to_string())
            }
            GroundingProtocol::PointChat => {
                let messages = [
                    ChatMessage::system(ASK_SYSTEM_PROMPT),
                    ChatMessage::user_with_image(question, frame.data_url()),
                ];
                let reply =
                    query_chat_completion(&self.client, &self.chat_config(), &messages).await?;
                Ok(reply.trim().to_string())
            }
        }
    }
}

impl Grounder for GroundingClient {
    fn locate<'a>(
        &'a self,
        frame: &'a Frame,
        description: &'a str,
    ) -> BoxFuture<'a, Result<GroundingResult, GroundingError>> {
        Box::pin(GroundingClient::locate(self, frame, description))
    }

    fn ask<'a>(
        &'a self,
        frame: &'a Frame,
        question: &'a str,
    ) -> BoxFuture<'a, Result<String, GroundingError>> {
        Box::pin(GroundingClient::ask(self, frame, question))
    }
}
