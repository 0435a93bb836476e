use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use crate::config::{LlmConfig, LlmProvider};
use crate::llm::chat_stream;

/// Ordered, finite text fragments from a streaming completion. Dropping the
/// stream cancels the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The remote text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream>;
}

/// Build the shared HTTP client for every LLM call.
pub fn build_http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// Chat-completion client for Ollama or OpenAI-compatible endpoints. Each
/// prompt is sent as a single user message.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpTextGenerator {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = vec![WireMessage::user(prompt)];
        match self.config.provider {
            LlmProvider::Ollama => call_ollama(&self.client, &self.config, messages).await,
            LlmProvider::OpenAi => call_openai(&self.client, &self.config, messages).await,
        }
    }

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream> {
        let messages = vec![WireMessage::user(prompt)];
        chat_stream::stream_chat(&self.client, &self.config, messages).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    pub content: String,
}

impl WireMessage {
    pub(crate) fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
pub(crate) struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub options: OllamaOptions,
}

#[derive(Serialize)]
pub(crate) struct OllamaOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

impl OllamaChatRequest {
    pub(crate) fn new(config: &LlmConfig, messages: Vec<WireMessage>, stream: bool) -> Self {
        Self {
            model: config.chat_model.clone(),
            messages,
            stream,
            options: OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
        }
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: WireMessage,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<WireMessage>,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);
    let req = OllamaChatRequest::new(config, messages, false);

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama chat response")?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
pub(crate) struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl OpenAiChatRequest {
    pub(crate) fn new(config: &LlmConfig, messages: Vec<WireMessage>, stream: bool) -> Self {
        Self {
            model: config.chat_model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<WireMessage>,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let req = OpenAiChatRequest::new(config, messages, false);

    let resp = client
        .post(&url)
        .bearer_auth(config.api_key.as_deref().unwrap_or_default())
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI chat response")?;
    let choice = body
        .choices
        .into_iter()
        .next()
        .context("OpenAI chat API returned no choices")?;
    Ok(choice.message.content.unwrap_or_default())
}
