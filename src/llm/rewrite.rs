use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::llm::client::TextGenerator;
use crate::llm::prompts;

/// Turns a follow-up question into a standalone retrieval query.
pub struct QueryRewriter {
    generator: Arc<dyn TextGenerator>,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Rewrite `question` using `history`. An empty or blank reply falls back
    /// to the original question; an empty query never reaches retrieval.
    pub async fn rewrite(&self, question: &str, history: &str) -> Result<String> {
        let reply = self
            .generator
            .complete(&prompts::rewrite(question, history))
            .await
            .map_err(EngineError::GenerationFailure)?;

        let rewritten = reply.trim();
        if rewritten.is_empty() {
            tracing::warn!("Rewriter returned nothing, keeping '{question}'");
            return Ok(question.to_string());
        }
        if rewritten == question {
            tracing::info!("Query kept as is: '{question}'");
        } else {
            tracing::info!("Query rewritten: '{question}' -> '{rewritten}'");
        }
        Ok(rewritten.to_string())
    }
}
