use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::llm::embeddings::Embedder;
use crate::models::Chunk;

/// Similarity search over chunk embeddings. Higher scores mean more similar.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search_with_scores(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>>;
}

/// A stored vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// On-disk layout of `vectors.json`.
#[derive(Serialize, Deserialize)]
struct PersistedStore {
    fingerprint: String,
    entries: Vec<VectorEntry>,
}

/// In-memory vector store with disk persistence and cosine similarity search.
///
/// Read-only once built; queries only embed the question and scan.
pub struct VectorStore {
    entries: Vec<VectorEntry>,
    embedder: Arc<dyn Embedder>,
}

/// Identity of a corpus as embedded by `model`: every chunk's text and
/// metadata, in order.
pub fn corpus_fingerprint(chunks: &[Chunk], model: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model.as_bytes());
    for chunk in chunks {
        hasher.update(&[0]);
        hasher.update(chunk.text.as_bytes());
        hasher.update(&[0]);
        hasher.update(Value::Object(chunk.metadata.clone()).to_string().as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl VectorStore {
    /// Load `vectors.json` from `vector_dir` when it was built from the same
    /// `chunks` with the same `model`, otherwise embed every chunk and
    /// persist the result.
    pub async fn open_or_build(
        vector_dir: &Path,
        chunks: &[Chunk],
        model: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(vector_dir).await?;
        let persist_path = vector_dir.join("vectors.json");
        let fingerprint = corpus_fingerprint(chunks, model);

        if tokio::fs::try_exists(&persist_path).await.unwrap_or(false) {
            let data = tokio::fs::read_to_string(&persist_path)
                .await
                .context("Failed to read vector store")?;
            match serde_json::from_str::<PersistedStore>(&data) {
                Ok(stored) if stored.fingerprint == fingerprint => {
                    tracing::info!(
                        "Loaded {} vectors from {}",
                        stored.entries.len(),
                        persist_path.display()
                    );
                    return Ok(Self {
                        entries: stored.entries,
                        embedder,
                    });
                }
                Ok(_) => tracing::warn!("Corpus or embedding model changed, rebuilding vector store"),
                Err(e) => tracing::warn!("Vector store unreadable ({e}), rebuilding"),
            }
        }

        let store = Self::build(chunks, embedder).await?;
        store.save(&persist_path, fingerprint).await?;
        Ok(store)
    }

    /// Embed every chunk. `chunks` and the returned embeddings stay parallel.
    pub async fn build(chunks: &[Chunk], embedder: Arc<dyn Embedder>) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder
            .embed(&texts)
            .await
            .context("Failed to embed corpus chunks")?;
        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            );
        }

        let entries = chunks
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry { chunk, embedding })
            .collect::<Vec<_>>();
        tracing::info!("Embedded {} chunks", entries.len());

        Ok(Self { entries, embedder })
    }

    /// Persist to disk (atomic write via temp file + rename).
    async fn save(&self, path: &Path, fingerprint: String) -> Result<()> {
        let stored = PersistedStore {
            fingerprint,
            entries: self.entries.clone(),
        };
        let data = serde_json::to_string(&stored)?;
        let tmp_path: PathBuf = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, data)
            .await
            .context("Failed to write vector store")?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .context("Failed to move vector store into place")?;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn search_with_scores(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .context("No embedding returned for query")?;

        let mut scored: Vec<(f32, &VectorEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(&query_embedding, &e.embedding), e))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| (e.chunk.clone(), score))
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
