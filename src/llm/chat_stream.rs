use anyhow::{Context, Result};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;

use crate::config::{LlmConfig, LlmProvider};
use crate::llm::client::{FragmentStream, OllamaChatRequest, OpenAiChatRequest, WireMessage};

/// Floor for streaming request timeouts: long step-by-step answers outlive
/// the default request timeout.
const MIN_STREAM_TIMEOUT_SECS: u64 = 300;

/// Stream chat completions from Ollama or OpenAI.
/// Returns a stream of content delta strings (one per token/chunk).
pub(crate) async fn stream_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<WireMessage>,
) -> Result<FragmentStream> {
    let timeout = Duration::from_secs(config.timeout_secs.max(MIN_STREAM_TIMEOUT_SECS));

    let request = match config.provider {
        LlmProvider::Ollama => client
            .post(format!("{}/api/chat", config.base_url))
            .json(&OllamaChatRequest::new(config, messages, true)),
        LlmProvider::OpenAi => client
            .post(format!("{}/v1/chat/completions", config.base_url))
            .bearer_auth(config.api_key.as_deref().unwrap_or_default())
            .json(&OpenAiChatRequest::new(config, messages, true)),
    };

    let resp = request
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("Failed to connect to {} for chat streaming", config.provider))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} chat API returned {status}: {body}", config.provider);
    }

    let provider = config.provider;
    let stream = stream_lines(resp.bytes_stream()).filter_map(move |line_result| async move {
        match line_result {
            Ok(line) => parse_line(provider, &line),
            Err(e) => Some(Err(e)),
        }
    });

    Ok(Box::pin(stream))
}

/// Parse one streamed line for `provider`. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for malformed chunks
/// - None to skip (blank lines, keep-alives, done markers, role-only chunks)
fn parse_line(provider: LlmProvider, line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match provider {
        LlmProvider::Ollama => parse_ollama_line(line),
        LlmProvider::OpenAi => parse_openai_line(line),
    }
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: WireMessage,
    done: bool,
}

fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    match serde_json::from_str::<OllamaStreamChunk>(line) {
        Ok(chunk) if chunk.done || chunk.message.content.is_empty() => None,
        Ok(chunk) => Some(Ok(chunk.message.content)),
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse Ollama chunk: {e}"))),
    }
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
            .map(Ok),
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse OpenAI chunk: {e}"))),
    }
}

// ─── Line buffering ──────────────────────────────────────

/// Convert a byte stream into a stream of complete lines. Bytes are buffered
/// until a newline so multi-byte characters split across reads decode intact.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    futures_util::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let rest = buffer.split_off(newline_pos + 1);
                    let line = String::from_utf8_lossy(&buffer[..newline_pos]).into_owned();
                    buffer = rest;
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("Stream read error: {e}")),
                            (stream, buffer),
                        ));
                    }
                    None => {
                        if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                            let remaining = String::from_utf8_lossy(&buffer).into_owned();
                            buffer.clear();
                            return Some((Ok(remaining), (stream, buffer)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}
