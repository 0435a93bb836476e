use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chunk and document metadata: string keys to scalar or array values.
pub type Metadata = Map<String, Value>;

/// A unit of retrievable recipe text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Similarity score, set by vector search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Fused score, set by RRF fusion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f64>,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
            score: None,
            rrf_score: None,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn parent_id(&self) -> Option<String> {
        meta_text(&self.metadata, "parent_id")
    }

    pub fn dish_name(&self) -> Option<String> {
        meta_text(&self.metadata, "dish_name")
    }

    /// Key used to collapse chunks of the same recipe: `parent_id`, falling
    /// back to `dish_name`.
    pub fn parent_key(&self) -> Option<String> {
        self.parent_id().or_else(|| self.dish_name())
    }

    /// Identity of the chunk for fusion: a hash of its text only, so the same
    /// passage returned by both retrievers merges into one candidate.
    pub fn content_hash(&self) -> String {
        blake3::hash(self.text.as_bytes()).to_hex().to_string()
    }
}

/// Render a scalar metadata value as text. Empty strings and non-scalars
/// count as absent.
fn meta_text(metadata: &Metadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The full recipe a chunk was cut from. Used for generation only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentDocument {
    pub parent_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ParentDocument {
    pub fn dish_name(&self) -> Option<String> {
        meta_text(&self.metadata, "dish_name")
    }

    pub fn category(&self) -> Option<String> {
        meta_text(&self.metadata, "category")
    }

    pub fn difficulty(&self) -> Option<String> {
        meta_text(&self.metadata, "difficulty")
    }
}

/// How a question is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Chat,
    List,
    Detail,
    General,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::List => "list",
            Self::Detail => "detail",
            Self::General => "general",
        }
    }

    /// Total mapping from raw classifier output. Anything that is not one of
    /// the four labels after trimming and lowercasing becomes `General`.
    pub fn from_model_output(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "chat" => Self::Chat,
            "list" => Self::List,
            "detail" => Self::Detail,
            _ => Self::General,
        }
    }

    /// Whether the model output named a route exactly.
    pub fn is_exact_label(raw: &str) -> bool {
        matches!(
            raw.trim().to_lowercase().as_str(),
            "chat" | "list" | "detail" | "general"
        )
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected value for one metadata filter key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    AnyOf(Vec<Value>),
    One(Value),
}

impl FilterValue {
    pub fn accepts(&self, actual: &Value) -> bool {
        match self {
            Self::One(expected) => expected == actual,
            Self::AnyOf(options) => options.contains(actual),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::One(Value::String(value.to_string()))
    }
}

/// Metadata filters keyed by metadata field. Ordered so matching and logging
/// are deterministic.
pub type Filters = BTreeMap<String, FilterValue>;

/// Per-retriever weights for reciprocal rank fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f64,
    pub bm25: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 3.0,
            bm25: 0.5,
        }
    }
}

impl FusionWeights {
    pub fn validate(&self) -> Result<(), String> {
        if !self.vector.is_finite() || !self.bm25.is_finite() {
            return Err("fusion weights must be finite".to_string());
        }
        if self.vector < 0.0 || self.bm25 < 0.0 {
            return Err("fusion weights must be non-negative".to_string());
        }
        if self.vector == 0.0 && self.bm25 == 0.0 {
            return Err("fusion weights must not both be zero".to_string());
        }
        Ok(())
    }
}

/// A single chat turn (user or assistant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Summary of a parent document returned alongside answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub dish_name: String,
    pub category: String,
    pub difficulty: String,
}

impl From<&ParentDocument> for DocumentInfo {
    fn from(doc: &ParentDocument) -> Self {
        Self {
            dish_name: doc.dish_name().unwrap_or_else(|| "未知菜品".to_string()),
            category: doc.category().unwrap_or_else(|| "未知".to_string()),
            difficulty: doc.difficulty().unwrap_or_else(|| "未知".to_string()),
        }
    }
}

/// A complete answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub route_type: RouteType,
    pub documents: Vec<DocumentInfo>,
}

/// One fragment of a streamed answer. Concatenating every `answer` field of a
/// stream yields the synchronous answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerFragment {
    pub answer: String,
    pub route_type: RouteType,
    pub documents: Vec<DocumentInfo>,
}

/// Knowledge base statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub categories: BTreeMap<String, usize>,
    pub difficulties: BTreeMap<String, usize>,
}

/// Question request
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    pub history: Option<Vec<ChatMessage>>,
    /// Base64-encoded photo of ingredients.
    pub image: Option<String>,
}

/// Search-by-category request
#[derive(Debug, Clone, Deserialize)]
pub struct CategorySearchRequest {
    pub category: String,
    #[serde(default)]
    pub query: Option<String>,
}

/// Search-by-category response
#[derive(Debug, Clone, Serialize)]
pub struct CategorySearchResponse {
    pub category: String,
    pub dishes: Vec<String>,
}
