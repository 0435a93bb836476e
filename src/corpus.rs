use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::models::{Chunk, ParentDocument, Statistics};
use crate::search::filter::Vocabulary;

/// On-disk layout of `corpus.json`, produced by the ingestion step.
#[derive(Deserialize)]
struct CorpusFile {
    documents: Vec<ParentDocument>,
    chunks: Vec<Chunk>,
    #[serde(default)]
    vocabulary: Option<Vocabulary>,
}

/// Parent recipes and their chunks. Read-only after load.
pub struct Corpus {
    documents: Vec<ParentDocument>,
    chunks: Vec<Chunk>,
    by_parent: HashMap<String, usize>,
    vocabulary: Vocabulary,
}

impl Corpus {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus from {}", path.display()))?;
        let file: CorpusFile =
            serde_json::from_str(&data).context("Failed to parse corpus file")?;

        let corpus = Self::new(file.documents, file.chunks);
        let corpus = match file.vocabulary {
            Some(vocabulary) => corpus.with_vocabulary(vocabulary),
            None => corpus,
        };
        tracing::info!(
            documents = corpus.documents.len(),
            chunks = corpus.chunks.len(),
            "Loaded corpus from {}",
            path.display()
        );
        Ok(corpus)
    }

    pub fn new(documents: Vec<ParentDocument>, chunks: Vec<Chunk>) -> Self {
        let by_parent = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (doc.parent_id.clone(), i))
            .collect();
        Self {
            documents,
            chunks,
            by_parent,
            vocabulary: Vocabulary::default(),
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn documents(&self) -> &[ParentDocument] {
        &self.documents
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Resolve ranked chunks to their unique parent recipes, in rank order.
    ///
    /// A chunk whose parent is unknown stands in for its own recipe, so
    /// unkeyed chunks still reach generation.
    pub fn parent_documents(&self, chunks: &[Chunk]) -> Vec<ParentDocument> {
        let mut seen = HashSet::new();
        let mut parents = Vec::new();

        for chunk in chunks {
            let resolved = chunk
                .parent_id()
                .and_then(|id| self.by_parent.get(&id))
                .map(|&i| self.documents[i].clone());

            let doc = match resolved {
                Some(doc) => doc,
                None => {
                    tracing::debug!("No parent document for chunk, using chunk text");
                    ParentDocument {
                        parent_id: chunk.parent_key().unwrap_or_else(|| chunk.content_hash()),
                        content: chunk.text.clone(),
                        metadata: chunk.metadata.clone(),
                    }
                }
            };

            if seen.insert(doc.parent_id.clone()) {
                parents.push(doc);
            }
        }

        parents
    }

    pub fn statistics(&self) -> Statistics {
        let mut categories = BTreeMap::new();
        let mut difficulties = BTreeMap::new();
        for doc in &self.documents {
            if let Some(category) = doc.category() {
                *categories.entry(category).or_insert(0) += 1;
            }
            if let Some(difficulty) = doc.difficulty() {
                *difficulties.entry(difficulty).or_insert(0) += 1;
            }
        }

        Statistics {
            total_documents: self.documents.len(),
            total_chunks: self.chunks.len(),
            categories,
            difficulties,
        }
    }
}
