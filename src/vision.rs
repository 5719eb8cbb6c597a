use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;

use crate::settings::VisionSettings;

/// One image plus one instruction, answered with free-form text.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub image_data_uri: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub type VisionFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

pub trait VisionModel: Send + Sync {
    fn complete(&self, request: VisionRequest) -> VisionFuture<'_>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    url: String,
    key: String,
    model: String,
}

impl VisionClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            key: key.into(),
            model: VisionSettings::default().model,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    /// `None` when no API key is configured.
    pub fn from_settings(settings: &VisionSettings) -> Result<Option<Self>> {
        let Some(key) = settings.key.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .with_context(|| "failed to build vision HTTP client")?;
        Ok(Some(
            Self::new(http, settings.url.clone(), key).with_model(settings.model.clone()),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl VisionModel for VisionClient {
    fn complete(&self, request: VisionRequest) -> VisionFuture<'_> {
        Box::pin(async move {
            let body = request_body(&self.model, &request);
            let response = self
                .http
                .post(&self.url)
                .bearer_auth(&self.key)
                .json(&body)
                .send()
                .await
                .with_context(|| "vision request failed")?;

            let status = response.status();
            let text = response
                .text()
                .await
                .with_context(|| "failed to read vision response body")?;
            if !status.is_success() {
                return Err(anyhow!(
                    "vision API error ({}): {}",
                    status,
                    extract_api_error(&text).unwrap_or(text)
                ));
            }
            extract_message_content(&text)
        })
    }
}

pub(crate) fn request_body(model: &str, request: &VisionRequest) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": request.image_data_uri}},
                    {"type": "text", "text": request.prompt}
                ]
            }
        ],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature
    })
}

fn extract_message_content(text: &str) -> Result<String> {
    let payload: ChatResponse =
        serde_json::from_str(text).with_context(|| "failed to parse vision response JSON")?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("no message content returned from vision model"))?;
    Ok(match content {
        MessageContent::Text(text) => text,
        MessageContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

fn extract_api_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ApiError>,
        message: Option<String>,
        code: Option<serde_json::Value>,
    }

    #[derive(Deserialize)]
    struct ApiError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let mut parts = Vec::new();
    if let Some(error) = parsed.error {
        parts.extend(error.message.filter(|value| !value.trim().is_empty()));
        if let Some(kind) = error.kind.filter(|value| !value.trim().is_empty()) {
            parts.push(format!("type: {}", kind));
        }
    }
    if let Some(message) = parsed.message.filter(|value| !value.trim().is_empty()) {
        parts.push(message);
    }
    if let Some(code) = parsed.code {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}
