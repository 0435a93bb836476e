use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::EngineError;
use crate::llm::prompts;

/// Reply meaning the photo shows no ingredients.
pub const NO_INGREDIENTS_SENTINEL: &str = "no ingredients found";

/// Recognises ingredient names in a photo, as a comma-separated list or the
/// [`NO_INGREDIENTS_SENTINEL`].
#[async_trait]
pub trait IngredientRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

pub struct HttpVisionRecognizer {
    client: reqwest::Client,
    config: LlmConfig,
    model: String,
}

impl HttpVisionRecognizer {
    pub fn new(client: reqwest::Client, config: LlmConfig, model: String) -> Self {
        Self {
            client,
            config,
            model,
        }
    }
}

#[async_trait]
impl IngredientRecognizer for HttpVisionRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let mime = sniff_image_mime(image).context("Unsupported image format")?;
        let encoded = STANDARD.encode(image);

        let (url, body) = match self.config.provider {
            LlmProvider::OpenAi => (
                format!("{}/v1/chat/completions", self.config.base_url),
                json!({
                    "model": self.model,
                    "max_tokens": 1000,
                    "messages": [{
                        "role": "user",
                        "content": [
                            {
                                "type": "image_url",
                                "image_url": {
                                    "url": format!("data:{mime};base64,{encoded}"),
                                    "detail": "high"
                                }
                            },
                            { "type": "text", "text": prompts::vision() }
                        ]
                    }]
                }),
            ),
            LlmProvider::Ollama => (
                format!("{}/api/chat", self.config.base_url),
                json!({
                    "model": self.model,
                    "stream": false,
                    "messages": [{
                        "role": "user",
                        "content": prompts::vision(),
                        "images": [encoded]
                    }]
                }),
            ),
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .send()
            .await
            .context("Failed to call vision API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Vision API returned {status}: {body}");
        }

        let reply: serde_json::Value = resp
            .json()
            .await
            .context("Failed to parse vision response")?;
        let content = match self.config.provider {
            LlmProvider::OpenAi => reply["choices"][0]["message"]["content"].as_str(),
            LlmProvider::Ollama => reply["message"]["content"].as_str(),
        };
        content
            .map(str::to_string)
            .context("Vision response carried no content")
    }
}

/// Identify the image type from its magic bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else {
        None
    }
}

/// Validate a recogniser reply. The sentinel (or an empty reply) is a
/// user-facing validation error, not an ingredient list.
pub fn parse_ingredients(raw: &str) -> Result<String, EngineError> {
    let normalized = raw
        .trim()
        .trim_end_matches(['.', '。'])
        .to_lowercase();
    if normalized.is_empty() || normalized == NO_INGREDIENTS_SENTINEL || normalized == "没有食材" {
        return Err(EngineError::Validation(
            "no ingredients were found in the image".to_string(),
        ));
    }

    let names: Vec<&str> = raw
        .split([',', '，', '、'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    Ok(names.join(","))
}

/// Prefix the question with the recognised ingredients.
pub fn question_with_ingredients(ingredients: &str, question: &str) -> String {
    format!("我有{ingredients},{question}")
}
