use std::collections::HashMap;

use crate::models::{Chunk, FusionWeights};

/// RRF smoothing constant.
pub const DEFAULT_RRF_K: u32 = 60;

/// Weighted Reciprocal Rank Fusion of a vector list and a BM25 list.
///
/// Each chunk at 0-based rank `r` in a list contributes
/// `weight / (k_const + r + 1)`. Chunks are identified by the hash of their
/// text, so the same passage found by both retrievers merges into one entry
/// (the first instance seen is kept). Output is sorted by fused score
/// descending with ties broken by identity hash, and every chunk carries its
/// `rrf_score`.
///
/// Hash collisions between distinct texts would merge them; at recipe-chunk
/// sizes this is accepted.
pub fn fuse(
    vector_list: &[Chunk],
    bm25_list: &[Chunk],
    weights: FusionWeights,
    k_const: u32,
) -> Vec<Chunk> {
    let k = f64::from(k_const);
    let mut score_map: HashMap<String, (Chunk, f64)> = HashMap::new();

    let sources = [
        ("vector", vector_list, weights.vector),
        ("bm25", bm25_list, weights.bm25),
    ];
    for (source, list, weight) in sources {
        for (rank, chunk) in list.iter().enumerate() {
            let contribution = weight * (1.0 / (k + rank as f64 + 1.0));
            tracing::debug!(
                source,
                rank,
                contribution,
                preview = %preview(&chunk.text),
                "rrf contribution"
            );
            let entry = score_map
                .entry(chunk.content_hash())
                .or_insert_with(|| (chunk.clone(), 0.0));
            entry.1 += contribution;
        }
    }

    let mut scored: Vec<(String, Chunk, f64)> = score_map
        .into_iter()
        .map(|(hash, (chunk, score))| (hash, chunk, score))
        .collect();
    scored.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    scored
        .into_iter()
        .map(|(_, mut chunk, score)| {
            chunk.rrf_score = Some(score);
            chunk
        })
        .collect()
}

fn preview(text: &str) -> String {
    text.chars().take(30).collect()
}
