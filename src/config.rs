use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::models::FusionWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the corpus file and the persisted vector index live
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Retrieval and fusion tuning
    pub retrieval: RetrievalConfig,
}

/// Wire protocol spoken by the LLM endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("Unknown LLM provider: {other}")),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => f.write_str("ollama"),
            Self::OpenAi => f.write_str("openai"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for routing, rewriting and answering
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// Model name for ingredient recognition (optional feature)
    pub vision_model: Option<String>,
    /// API key (required for cloud providers)
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Request timeout in seconds, applied by the HTTP client
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks handed to generation
    pub top_k: usize,
    /// Depth requested from each retriever before fusion
    pub candidates: usize,
    /// Vector hits scoring below this are discarded
    pub score_threshold: f32,
    pub weights: FusionWeights,
    /// RRF smoothing constant
    pub rrf_k: u32,
    /// Most recent chat turns included in prompts
    pub history_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "https://api.openai.com".to_string(),
            chat_model: "Qwen/Qwen2.5-7B-Instruct".to_string(),
            embedding_model: "BAAI/bge-small-zh-v1.5".to_string(),
            vision_model: None,
            api_key: None,
            temperature: 0.1,
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            candidates: 10,
            score_threshold: 0.4,
            weights: FusionWeights::default(),
            rrf_k: 60,
            history_window: 6,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!("Ignoring unparseable {key}={val}"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RECIPE_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("RECIPE_RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }

        env_parse("LLM_PROVIDER", &mut config.llm.provider);
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(model) = std::env::var("LLM_MODEL_VL") {
            config.llm.vision_model = Some(model);
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        env_parse("LLM_TEMPERATURE", &mut config.llm.temperature);
        env_parse("LLM_MAX_TOKENS", &mut config.llm.max_tokens);
        env_parse("LLM_TIMEOUT", &mut config.llm.timeout_secs);

        env_parse("RAG_TOP_K", &mut config.retrieval.top_k);
        env_parse("RAG_CANDIDATES", &mut config.retrieval.candidates);
        env_parse("RAG_SCORE_THRESHOLD", &mut config.retrieval.score_threshold);
        env_parse("RAG_VECTOR_WEIGHT", &mut config.retrieval.weights.vector);
        env_parse("RAG_BM25_WEIGHT", &mut config.retrieval.weights.bm25);
        env_parse("RAG_RRF_K", &mut config.retrieval.rrf_k);
        env_parse("RAG_HISTORY_WINDOW", &mut config.retrieval.history_window);

        config
    }

    /// Check everything the engine needs before it starts building indexes.
    pub fn validate(&self) -> Result<()> {
        let llm = &self.llm;
        if llm.provider == LlmProvider::OpenAi
            && llm.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(EngineError::Configuration(
                "LLM_API_KEY must be set for the openai provider".to_string(),
            ));
        }
        if llm.chat_model.trim().is_empty() {
            return Err(EngineError::Configuration("LLM_MODEL is empty".to_string()));
        }
        if llm.embedding_model.trim().is_empty() {
            return Err(EngineError::Configuration(
                "LLM_EMBEDDING_MODEL is empty".to_string(),
            ));
        }
        self.retrieval.validate()
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join("corpus.json")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate().map_err(EngineError::Configuration)?;
        if self.top_k == 0 || self.candidates == 0 {
            return Err(EngineError::Configuration(
                "RAG_TOP_K and RAG_CANDIDATES must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
