use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::llm::client::TextGenerator;
use crate::llm::prompts;
use crate::models::RouteType;

/// Classifies a question into a [`RouteType`] with one model call.
///
/// The model is an untrusted classifier: its raw reply is mapped through
/// [`RouteType::from_model_output`], so anything unexpected lands on
/// `General`. Only a failed call is an error.
pub struct QueryRouter {
    generator: Arc<dyn TextGenerator>,
}

impl QueryRouter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn route(&self, question: &str) -> Result<RouteType> {
        let raw = self
            .generator
            .complete(&prompts::route(question))
            .await
            .map_err(EngineError::GenerationFailure)?;

        let route = RouteType::from_model_output(&raw);
        if !RouteType::is_exact_label(&raw) {
            tracing::warn!("Unrecognised route label {raw:?}, defaulting to {route}");
        }
        tracing::info!("Routed question to {route}");
        Ok(route)
    }
}
