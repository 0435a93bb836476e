use anyhow::{Context, Result};
use std::cmp::Reverse;
use std::collections::HashSet;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::tokenizer::TextAnalyzer;
use tantivy::{doc, DocId, Index, IndexReader, IndexWriter, ReloadPolicy, Score, SegmentReader, Term};

use crate::models::Chunk;
use crate::search::tokenizer::{self, JiebaTokenizer, TOKENIZER_NAME};

/// BM25 index over every chunk of the corpus, built once in memory.
///
/// Chunks are kept alongside the index and addressed by their insertion
/// ordinal, a fast field that also breaks score ties inside the collector.
pub struct LexicalIndex {
    reader: IndexReader,
    chunks: Vec<Chunk>,
    f_text: Field,
}

const ORDINAL_FIELD: &str = "ordinal";

impl LexicalIndex {
    pub fn build(chunks: Vec<Chunk>) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_ordinal = schema_builder.add_u64_field(ORDINAL_FIELD, FAST);
        let text_indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let f_text = schema_builder.add_text_field(
            "text",
            TextOptions::default().set_indexing_options(text_indexing),
        );
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        index
            .tokenizers()
            .register(TOKENIZER_NAME, TextAnalyzer::from(JiebaTokenizer));

        // One indexing thread keeps doc ids in insertion order.
        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, 50_000_000)
            .context("Failed to create index writer")?;

        for (ordinal, chunk) in chunks.iter().enumerate() {
            writer.add_document(doc!(
                f_ordinal => ordinal as u64,
                f_text => chunk.text.clone(),
            ))?;
        }
        writer.commit().context("Failed to commit BM25 index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        tracing::info!("BM25 index built over {} chunks", chunks.len());

        Ok(Self {
            reader,
            chunks,
            f_text,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top `k` chunks by BM25 score, ties broken by insertion order.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let clauses: Vec<(Occur, Box<dyn Query>)> = tokenizer::segment(query)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .map(|term| {
                let term = Term::from_field_text(self.f_text, &term);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        if clauses.is_empty() {
            return Ok(Vec::new());
        }
        let query = BooleanQuery::new(clauses);

        // Rank by (score, earliest ordinal) so ties at the cut-off never
        // depend on segment layout.
        let collector = TopDocs::with_limit(k).tweak_score(|segment_reader: &SegmentReader| {
            let ordinals = segment_reader.fast_fields().u64(ORDINAL_FIELD).ok();
            move |doc: DocId, score: Score| {
                let ordinal = ordinals
                    .as_ref()
                    .and_then(|column| column.first(doc))
                    .unwrap_or(u64::MAX);
                (score, Reverse(ordinal))
            }
        });
        let searcher = self.reader.searcher();
        let scored = searcher.search(&query, &collector).context("Search failed")?;

        Ok(scored
            .into_iter()
            .filter_map(|((_, Reverse(ordinal)), _)| self.chunks.get(ordinal as usize).cloned())
            .collect())
    }
}
