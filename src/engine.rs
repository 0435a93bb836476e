use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::answer::AnswerPipeline;
use crate::config::{Config, RetrievalConfig};
use crate::corpus::Corpus;
use crate::error::{EngineError, Result};
use crate::llm::client::{build_http_client, HttpTextGenerator, TextGenerator};
use crate::llm::embeddings::{Embedder, HttpEmbedder};
use crate::llm::prompts;
use crate::llm::rewrite::QueryRewriter;
use crate::llm::router::QueryRouter;
use crate::llm::vision::{self, HttpVisionRecognizer, IngredientRecognizer};
use crate::models::{
    Answer, AnswerFragment, ChatMessage, DocumentInfo, FilterValue, Filters, ParentDocument,
    RouteType, Statistics,
};
use crate::search::bm25::LexicalIndex;
use crate::search::filter::Vocabulary;
use crate::search::retriever::RetrievalOrchestrator;
use crate::search::vector::{VectorIndex, VectorStore};

/// Questions longer than this are cut before routing.
pub const MAX_QUESTION_CHARS: usize = 2000;

/// Results requested by a category search.
const CATEGORY_SEARCH_TOP_K: usize = 10;

pub type AnswerFragmentStream = Pin<Box<dyn Stream<Item = Result<AnswerFragment>> + Send>>;

/// The question-answering engine: corpus, indexes and model-backed stages.
/// Read-only once built and shared by reference across requests.
pub struct RecipeEngine {
    corpus: Arc<Corpus>,
    router: QueryRouter,
    rewriter: QueryRewriter,
    retriever: RetrievalOrchestrator,
    answers: AnswerPipeline,
    vision: Option<Arc<dyn IngredientRecognizer>>,
}

/// Everything generation needs, resolved before the first model token.
struct Prepared {
    route: RouteType,
    question: String,
    history: String,
    docs: Vec<ParentDocument>,
}

impl RecipeEngine {
    pub fn new(
        corpus: Corpus,
        lexical: LexicalIndex,
        vector: Arc<dyn VectorIndex>,
        generator: Arc<dyn TextGenerator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            corpus: Arc::new(corpus),
            router: QueryRouter::new(Arc::clone(&generator)),
            rewriter: QueryRewriter::new(Arc::clone(&generator)),
            retriever: RetrievalOrchestrator::new(Arc::new(lexical), vector, config),
            answers: AnswerPipeline::new(generator),
            vision: None,
        }
    }

    pub fn with_vision(mut self, recognizer: Arc<dyn IngredientRecognizer>) -> Self {
        self.vision = Some(recognizer);
        self
    }

    /// Load the corpus, build the BM25 index, load or build the vector index
    /// and wire up the HTTP model clients.
    pub async fn build(config: &Config) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();

        let corpus_path = config.corpus_path();
        let corpus = tokio::task::spawn_blocking(move || Corpus::load(&corpus_path))
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("Corpus load task failed: {e}")))?
            .map_err(EngineError::Internal)?;

        let chunks = corpus.chunks().to_vec();
        let lexical = tokio::task::spawn_blocking(move || LexicalIndex::build(chunks))
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("BM25 build task failed: {e}")))?
            .map_err(EngineError::Internal)?;

        let client = build_http_client(&config.llm).map_err(EngineError::Internal)?;
        let embedder: Arc<dyn Embedder> =
            Arc::new(HttpEmbedder::new(client.clone(), config.llm.clone()));
        let vectors = VectorStore::open_or_build(
            &config.vector_dir(),
            corpus.chunks(),
            &config.llm.embedding_model,
            embedder,
        )
        .await
            .map_err(|e| EngineError::Internal(e.context("Failed to prepare vector index")))?;

        let generator: Arc<dyn TextGenerator> =
            Arc::new(HttpTextGenerator::new(client.clone(), config.llm.clone()));
        let mut engine = Self::new(
            corpus,
            lexical,
            Arc::new(vectors),
            generator,
            config.retrieval.clone(),
        );

        if let Some(model) = &config.llm.vision_model {
            engine = engine.with_vision(Arc::new(HttpVisionRecognizer::new(
                client,
                config.llm.clone(),
                model.clone(),
            )));
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recipe engine ready"
        );
        Ok(engine)
    }

    pub async fn ask(&self, question: &str, history: &[ChatMessage]) -> Result<Answer> {
        let prepared = self.prepare(question, history).await?;
        let answer = self
            .answers
            .answer(
                prepared.route,
                &prepared.question,
                &prepared.docs,
                &prepared.history,
            )
            .await?;

        Ok(Answer {
            answer,
            route_type: prepared.route,
            documents: document_infos(&prepared.docs),
        })
    }

    /// Streaming form of [`RecipeEngine::ask`]. Routing and retrieval finish
    /// before this returns, so their errors surface here rather than in the
    /// stream.
    pub async fn ask_stream(
        &self,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<AnswerFragmentStream> {
        let prepared = self.prepare(question, history).await?;
        let fragments = self
            .answers
            .answer_stream(
                prepared.route,
                &prepared.question,
                &prepared.docs,
                &prepared.history,
            )
            .await?;

        let route = prepared.route;
        let documents = document_infos(&prepared.docs);
        Ok(Box::pin(fragments.map(move |item| {
            item.map(|answer| AnswerFragment {
                answer,
                route_type: route,
                documents: documents.clone(),
            })
        })))
    }

    /// Turn a photo into a question about the recognised ingredients.
    pub async fn question_with_image(&self, question: &str, image: &[u8]) -> Result<String> {
        let recognizer = self.vision.as_ref().ok_or_else(|| {
            EngineError::Configuration("no vision model configured (LLM_MODEL_VL)".to_string())
        })?;
        let raw = recognizer
            .recognize(image)
            .await
            .map_err(EngineError::GenerationFailure)?;
        let ingredients = vision::parse_ingredients(&raw)?;
        tracing::info!("Recognised ingredients: {ingredients}");
        Ok(vision::question_with_ingredients(&ingredients, question))
    }

    pub async fn ask_with_image(
        &self,
        question: &str,
        image: &[u8],
        history: &[ChatMessage],
    ) -> Result<Answer> {
        let question = self.question_with_image(question, image).await?;
        self.ask(&question, history).await
    }

    /// Distinct dish names in `category`, ranked for `query` (the category
    /// itself when absent).
    pub async fn search_by_category(
        &self,
        category: &str,
        query: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut filters = Filters::new();
        filters.insert("category".to_string(), FilterValue::from(category));
        self.corpus.vocabulary().validate_filters(&filters)?;

        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(category);
        let chunks = self
            .retriever
            .retrieve(query, RouteType::General, &filters, CATEGORY_SEARCH_TOP_K)
            .await?;

        let mut names: Vec<String> = Vec::new();
        for chunk in &chunks {
            let name = chunk.dish_name().unwrap_or_else(|| "未知菜品".to_string());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    pub fn categories(&self) -> &[String] {
        &self.vocabulary().categories
    }

    pub fn difficulties(&self) -> &[String] {
        &self.vocabulary().difficulties
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        self.corpus.vocabulary()
    }

    pub fn statistics(&self) -> Statistics {
        self.corpus.statistics()
    }

    async fn prepare(&self, question: &str, history: &[ChatMessage]) -> Result<Prepared> {
        let sanitized = prompts::sanitize(question);
        let question = truncate_chars(sanitized.trim(), MAX_QUESTION_CHARS)
            .trim()
            .to_string();
        if question.is_empty() {
            return Err(EngineError::Validation("question must not be empty".to_string()));
        }
        let config = self.retriever.config();
        let history = format_history(history, config.history_window);

        let route = self.router.route(&question).await?;
        if route == RouteType::Chat {
            return Ok(Prepared {
                route,
                question,
                history,
                docs: Vec::new(),
            });
        }

        // Filters come from the user's own words, before rewriting.
        let filters = self.vocabulary().extract_filters(&question);
        let query = self.rewriter.rewrite(&question, &history).await?;
        let chunks = self
            .retriever
            .retrieve(&query, route, &filters, config.top_k)
            .await?;
        let docs = self.corpus.parent_documents(&chunks);

        tracing::info!(
            %route,
            query = %query,
            chunks = chunks.len(),
            documents = docs.len(),
            "Prepared answer context"
        );
        Ok(Prepared {
            route,
            question,
            history,
            docs,
        })
    }
}

/// Format the most recent `window` user/assistant turns as prompt text.
/// Other roles are dropped.
pub fn format_history(history: &[ChatMessage], window: usize) -> String {
    let turns: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .collect();
    let start = turns.len().saturating_sub(window);

    turns[start..]
        .iter()
        .map(|m| {
            let speaker = if m.role == "user" { "用户" } else { "助手" };
            format!(
                "{speaker}: {}",
                prompts::sanitize(&truncate_chars(&m.content, MAX_QUESTION_CHARS))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn document_infos(docs: &[ParentDocument]) -> Vec<DocumentInfo> {
    docs.iter().map(DocumentInfo::from).collect()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
