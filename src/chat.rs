//! Chat-completion providers.
//!
//! Both providers send the system instruction, then the prior turns with
//! their roles, then the latest input as a `user` message. Generation calls
//! are not retried; a failure or timeout surfaces as
//! [`RagError::GenerationService`] and the turn is abandoned.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use rag_chat_core::chat::{ChatModel, ChatRequest};
use rag_chat_core::{RagError, Result};

use crate::config::ChatConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

fn generation_error(msg: impl Into<String>) -> RagError {
    RagError::GenerationService(msg.into())
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Flatten a request into the role-tagged message list both APIs accept.
fn to_messages<'a>(request: &ChatRequest<'a>) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: request.system,
    });
    for turn in request.history {
        messages.push(ChatMessage {
            role: turn.role.as_str(),
            content: &turn.text,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: request.input,
    });
    messages
}

async fn post_json<T: serde::de::DeserializeOwned>(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let resp = request
        .send()
        .await
        .map_err(|e| generation_error(format!("failed to call {}: {}", service, e)))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(generation_error(format!(
            "{} returned {}: {}",
            service, status, text
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| generation_error(format!("failed to parse {} response: {}", service, e)))
}

fn http_client(timeout_secs: u64, service: &str) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .with_context(|| format!("failed to build {} HTTP client", service))
}

// ============ OpenAI ============

/// `POST /v1/chat/completions`. Requires `OPENAI_API_KEY`.
pub struct OpenAiChat {
    model: String,
    api_key: String,
    base_url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ChatConfig, api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            temperature: config.temperature,
            client: http_client(config.timeout_secs, "OpenAI")?,
        })
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ChatRequest<'_>) -> Result<String> {
        let body = OpenAiRequest {
            model: &self.model,
            messages: to_messages(request),
            temperature: self.temperature,
        };
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let parsed: OpenAiResponse = post_json(
            "OpenAI",
            self.client
                .post(url)
                .bearer_auth(self.api_key.trim())
                .json(&body),
        )
        .await?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| generation_error("OpenAI response contained no choices"))
    }
}

// ============ Ollama ============

/// `POST /api/chat` with `stream: false`.
pub struct OllamaChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            temperature: config.temperature,
            client: http_client(config.timeout_secs, "Ollama")?,
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: AssistantMessage,
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ChatRequest<'_>) -> Result<String> {
        let body = OllamaRequest {
            model: &self.model,
            messages: to_messages(request),
            stream: false,
            options: self.temperature.map(|temperature| OllamaOptions { temperature }),
        };
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let parsed: OllamaResponse =
            post_json("Ollama", self.client.post(url).json(&body)).await?;
        Ok(parsed.message.content.unwrap_or_default())
    }
}

/// Create the [`ChatModel`] named by `[chat].provider`.
pub fn create_chat_model(config: &ChatConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}
