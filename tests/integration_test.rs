//! Integration tests for the recipe question-answering pipeline.
//!
//! These tests exercise corpus loading, index building, hybrid retrieval and
//! answering end to end, with in-process fakes standing in for the LLM and
//! embedding services.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;

use recipe_rag::answer::NO_RESULTS_APOLOGY;
use recipe_rag::config::{Config, RetrievalConfig};
use recipe_rag::corpus::Corpus;
use recipe_rag::engine::RecipeEngine;
use recipe_rag::llm::client::{FragmentStream, TextGenerator};
use recipe_rag::llm::embeddings::Embedder;
use recipe_rag::models::{FilterValue, Filters, RouteType};
use recipe_rag::search::bm25::LexicalIndex;
use recipe_rag::search::retriever::RetrievalOrchestrator;
use recipe_rag::search::vector::{VectorIndex, VectorStore};
use recipe_rag::state::EngineHandle;

/// Replies in call order; streams split each reply into two-character pieces.
struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }

    fn next(&self) -> anyhow::Result<String> {
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        self.next()
    }

    async fn complete_stream(&self, _prompt: &str) -> anyhow::Result<FragmentStream> {
        let reply = self.next()?;
        let chars: Vec<char> = reply.chars().collect();
        let pieces: Vec<anyhow::Result<String>> = chars
            .chunks(2)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(pieces)))
    }
}

/// Keyword-presence embeddings over a small ingredient vocabulary.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

const KEYWORDS: [&str; 8] = ["五花肉", "排骨", "黄瓜", "茄子", "豆腐", "鸡蛋", "番茄", "土豆"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                KEYWORDS
                    .iter()
                    .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

fn write_corpus(dir: &Path) -> std::path::PathBuf {
    let recipes = [
        ("红烧肉", "荤菜", "中等", "五花肉 冰糖 酱油，焯水后小火慢炖"),
        ("糖醋排骨", "荤菜", "中等", "排骨 白糖 香醋，炸后收汁"),
        ("拍黄瓜", "素菜", "非常简单", "黄瓜 蒜 香醋 凉拌"),
        ("鱼香茄子", "素菜", "简单", "茄子 豆瓣酱 蒜 炒"),
        ("麻婆豆腐", "素菜", "中等", "豆腐 花椒 豆瓣酱 烧"),
        ("地三鲜", "素菜", "中等", "茄子 土豆 青椒 炸"),
        ("番茄炒蛋", "素菜", "简单", "番茄 鸡蛋 炒"),
        ("酸辣土豆丝", "素菜", "简单", "土豆 辣椒 醋 炒"),
        ("番茄蛋汤", "汤品", "简单", "番茄 鸡蛋 煮汤"),
    ];

    let documents: Vec<_> = recipes
        .iter()
        .map(|(name, category, difficulty, body)| {
            json!({
                "parent_id": name,
                "content": format!("# {name}\n\n用料与步骤：{body}"),
                "metadata": {"dish_name": name, "category": category, "difficulty": difficulty}
            })
        })
        .collect();
    let chunks: Vec<_> = recipes
        .iter()
        .flat_map(|(name, category, difficulty, body)| {
            let metadata = json!({
                "parent_id": name, "dish_name": name,
                "category": category, "difficulty": difficulty
            });
            vec![
                json!({"text": format!("{name} {category} {difficulty}"), "metadata": metadata}),
                json!({"text": format!("{name} 做法 {body}"), "metadata": metadata}),
            ]
        })
        .collect();

    let path = dir.join("corpus.json");
    let body = json!({"documents": documents, "chunks": chunks});
    std::fs::write(&path, body.to_string()).unwrap();
    path
}

async fn build_engine(
    dir: &Path,
    generator: Arc<ScriptedGenerator>,
    retrieval: RetrievalConfig,
) -> (RecipeEngine, Arc<KeywordEmbedder>) {
    let corpus = Corpus::load(&write_corpus(dir)).unwrap();
    let lexical = LexicalIndex::build(corpus.chunks().to_vec()).unwrap();
    let embedder = Arc::new(KeywordEmbedder {
        calls: AtomicUsize::new(0),
    });
    let vectors = VectorStore::open_or_build(
        &dir.join("vectors"),
        corpus.chunks(),
        "keyword-embedder",
        embedder.clone(),
    )
    .await
    .unwrap();
    let engine = RecipeEngine::new(corpus, lexical, Arc::new(vectors), generator, retrieval);
    (engine, embedder)
}

#[tokio::test]
async fn test_end_to_end_detail_question() {
    let dir = tempfile::tempdir().unwrap();
    let reply = "## 🥘 菜品介绍\n红烧肉肥而不腻。\n## 👨‍🍳 制作步骤\n1. 五花肉焯水\n2. 小火慢炖";
    let generator = ScriptedGenerator::new(&["detail", "红烧肉 五花肉 做法", reply]);
    let (engine, _) = build_engine(dir.path(), generator, RetrievalConfig::default()).await;

    let answer = engine.ask("红烧肉怎么做", &[]).await.unwrap();
    assert_eq!(answer.route_type, RouteType::Detail);
    assert_eq!(answer.answer, reply);
    assert_eq!(answer.documents[0].dish_name, "红烧肉");
    assert_eq!(answer.documents[0].category, "荤菜");
    assert!(answer.documents.len() <= 3);
}

#[tokio::test]
async fn test_list_question_with_category_filter() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&["list", "素菜", "list", "素菜"]);
    let retrieval = RetrievalConfig {
        top_k: 5,
        ..RetrievalConfig::default()
    };
    let (engine, _) = build_engine(dir.path(), generator, retrieval).await;

    let answer = engine.ask("推荐几道素菜", &[]).await.unwrap();
    assert_eq!(answer.route_type, RouteType::List);
    assert_eq!(answer.documents.len(), 5);
    assert!(answer.documents.iter().all(|d| d.category == "素菜"));
    assert!(answer.answer.starts_with("为您推荐以下菜品：\n1. "));
    assert!(answer.answer.ends_with("\n\n还有其他 2 道菜品可供选择。"));

    let streamed: String = engine
        .ask_stream("推荐几道素菜", &[])
        .await
        .unwrap()
        .map(|f| f.unwrap().answer)
        .collect::<Vec<_>>()
        .await
        .concat();
    assert_eq!(streamed, answer.answer);
}

#[tokio::test]
async fn test_unmatched_question_gets_apology() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&["general", "火星 旅行"]);
    let (engine, _) = build_engine(dir.path(), generator, RetrievalConfig::default()).await;

    let answer = engine.ask("火星旅行攻略", &[]).await.unwrap();
    assert_eq!(answer.answer, NO_RESULTS_APOLOGY);
    assert!(answer.documents.is_empty());
}

#[tokio::test]
async fn test_hybrid_retrieval_with_filters_and_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = Corpus::load(&write_corpus(dir.path())).unwrap();
    let lexical = Arc::new(LexicalIndex::build(corpus.chunks().to_vec()).unwrap());
    let vectors: Arc<dyn VectorIndex> = Arc::new(
        VectorStore::build(
            corpus.chunks(),
            Arc::new(KeywordEmbedder {
                calls: AtomicUsize::new(0),
            }),
        )
        .await
        .unwrap(),
    );
    let retriever = RetrievalOrchestrator::new(lexical, vectors, RetrievalConfig::default());

    let mut filters = Filters::new();
    filters.insert("difficulty".into(), FilterValue::from("简单"));
    let hits = retriever
        .retrieve("番茄 鸡蛋", RouteType::General, &filters, 3)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|c| c.metadata["difficulty"] == "简单"));
    assert!(hits.iter().all(|c| c.rrf_score.is_some()));

    let parents: Vec<String> = hits.iter().filter_map(|c| c.parent_id()).collect();
    assert!(parents.contains(&"番茄炒蛋".to_string()) || parents.contains(&"番茄蛋汤".to_string()));
}

#[tokio::test]
async fn test_vector_store_persisted_between_builds() {
    let dir = tempfile::tempdir().unwrap();
    let (_, first) = build_engine(dir.path(), ScriptedGenerator::new(&[]), RetrievalConfig::default()).await;
    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    assert!(dir.path().join("vectors").join("vectors.json").exists());

    let (_, second) = build_engine(dir.path(), ScriptedGenerator::new(&[]), RetrievalConfig::default()).await;
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_engine_handle_serves_built_engine() {
    let dir = tempfile::tempdir().unwrap();
    let handle = EngineHandle::new(Config::default());
    assert_eq!(handle.get().err().unwrap().kind(), "retrieval_unavailable");

    let generator = ScriptedGenerator::new(&["chat", "你好，我是美食助手。"]);
    let path = dir.path().to_path_buf();
    let engine = handle
        .get_or_init_with(|| async move {
            Ok(build_engine(&path, generator, RetrievalConfig::default()).await.0)
        })
        .await
        .unwrap();

    let stats = engine.statistics();
    assert_eq!(stats.total_documents, 9);
    assert_eq!(stats.total_chunks, 18);
    assert_eq!(stats.categories["素菜"], 6);

    let answer = handle.get().unwrap().ask("你好", &[]).await.unwrap();
    assert_eq!(answer.route_type, RouteType::Chat);
    assert!(answer.documents.is_empty());
}

#[tokio::test]
async fn test_search_by_category_returns_distinct_dishes() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = build_engine(dir.path(), ScriptedGenerator::new(&[]), RetrievalConfig::default()).await;

    let dishes = engine.search_by_category("汤品", None).await.unwrap();
    assert_eq!(dishes, vec!["番茄蛋汤".to_string()]);

    let err = engine.search_by_category("川菜", None).await.unwrap_err();
    assert_eq!(err.kind(), "validation_error");
}
