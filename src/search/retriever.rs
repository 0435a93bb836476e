use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{EngineError, Result};
use crate::models::{Chunk, Filters, RouteType};
use crate::search::bm25::LexicalIndex;
use crate::search::dedup::dedup_by_parent;
use crate::search::filter::filter_by_metadata;
use crate::search::fusion::fuse;
use crate::search::vector::VectorIndex;

/// Hybrid retrieval over the lexical and vector indexes.
///
/// ```text
///   query ──┬── BM25 (blocking pool) ─── dedup ──┐
///           └── vector ── threshold ─── dedup ───┴── RRF ── filter / top-k
/// ```
pub struct RetrievalOrchestrator {
    lexical: Arc<LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        lexical: Arc<LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked chunks for `query`. Chat routes skip retrieval. With filters
    /// the fused list is widened to `3 * top_k` before filtering down to
    /// `top_k`; without, it is simply truncated.
    pub async fn retrieve(
        &self,
        query: &str,
        route: RouteType,
        filters: &Filters,
        top_k: usize,
    ) -> Result<Vec<Chunk>> {
        if route == RouteType::Chat || top_k == 0 {
            return Ok(Vec::new());
        }

        let pool = if filters.is_empty() { top_k } else { top_k * 3 };
        let depth = self.config.candidates.max(pool);

        let lexical = Arc::clone(&self.lexical);
        let lexical_query = query.to_string();
        let bm25_task =
            tokio::task::spawn_blocking(move || lexical.search(&lexical_query, depth));
        let (bm25_joined, vector_result) =
            tokio::join!(bm25_task, self.vector.search_with_scores(query, depth));

        let bm25_hits = bm25_joined
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("BM25 search task failed: {e}")))?
            .map_err(EngineError::Internal)?;
        let vector_hits = vector_result.map_err(EngineError::GenerationFailure)?;

        let threshold = self.config.score_threshold;
        let vector_total = vector_hits.len();
        let vector_hits: Vec<Chunk> = vector_hits
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .map(|(mut chunk, score)| {
                chunk.score = Some(score);
                chunk
            })
            .collect();

        tracing::info!(
            bm25 = bm25_hits.len(),
            vector = vector_hits.len(),
            below_threshold = vector_total - vector_hits.len(),
            "retrieved candidates"
        );

        let vector_hits = dedup_by_parent(vector_hits);
        let bm25_hits = dedup_by_parent(bm25_hits);
        let mut fused = fuse(
            &vector_hits,
            &bm25_hits,
            self.config.weights,
            self.config.rrf_k,
        );

        if filters.is_empty() {
            fused.truncate(top_k);
            return Ok(fused);
        }

        fused.truncate(pool);
        let filtered = filter_by_metadata(fused, filters, top_k);
        tracing::info!(?filters, kept = filtered.len(), "applied metadata filters");
        Ok(filtered)
    }
}
