use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;

use crate::api::{error_body, ApiError};
use crate::error::EngineError;
use crate::llm::vision::sniff_image_mime;
use crate::models::{Answer, QuestionRequest};
use crate::state::AppState;

/// Longest gap tolerated between two streamed fragments.
const IDLE_TIMEOUT_SECS: u64 = 30;

/// POST /api/ask - Route, retrieve and answer in one response.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<Answer>, ApiError> {
    let engine = state.engine.get()?;
    let history = req.history.unwrap_or_default();

    let answer = match req.image.as_deref() {
        Some(image) => {
            let image = decode_image(image)?;
            engine.ask_with_image(&req.question, &image, &history).await?
        }
        None => engine.ask(&req.question, &history).await?,
    };
    Ok(Json(answer))
}

/// POST /api/ask_stream - Same as `/api/ask` as server-sent events.
///
/// Emits one `delta` event per fragment (`{answer, route_type, documents}`),
/// then `done`. A failure mid-stream emits a single `error` event and closes.
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(req): Json<QuestionRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let engine = state.engine.get()?;
    let history = req.history.unwrap_or_default();

    let question = match req.image.as_deref() {
        Some(image) => {
            let image = decode_image(image)?;
            engine.question_with_image(&req.question, &image).await?
        }
        None => req.question,
    };
    let mut fragments = engine.ask_stream(&question, &history).await?;

    let idle_timeout = Duration::from_secs(IDLE_TIMEOUT_SECS);
    let events = async_stream::stream! {
        loop {
            match tokio::time::timeout(idle_timeout, fragments.next()).await {
                Ok(Some(Ok(fragment))) => yield Ok::<_, Infallible>(json_event("delta", &fragment)),
                Ok(Some(Err(e))) => {
                    yield Ok(json_event("error", &error_body(&e)));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    let e = EngineError::GenerationFailure(anyhow::anyhow!(
                        "answer stream idle for {IDLE_TIMEOUT_SECS}s"
                    ));
                    yield Ok(json_event("error", &error_body(&e)));
                    return;
                }
            }
        }
        yield Ok(json_event("done", &serde_json::json!({})));
    };

    Ok(Sse::new(events))
}

fn json_event(name: &str, data: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize {name} event: {e}");
            Event::default().event("error").data("{}")
        })
}

/// Decode a base64 photo, with or without a `data:image/...;base64,` prefix.
fn decode_image(encoded: &str) -> Result<Vec<u8>, EngineError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| EngineError::Validation(format!("image is not valid base64: {e}")))?;
    if sniff_image_mime(&bytes).is_none() {
        return Err(EngineError::Validation(
            "image must be JPEG, PNG, WebP or GIF".to_string(),
        ));
    }
    Ok(bytes)
}
