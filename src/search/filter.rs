use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::models::{Chunk, FilterValue, Filters};

/// Metadata keys a filter may reference.
pub const SUPPORTED_FILTER_KEYS: &[&str] = &["category", "difficulty", "dish_name", "parent_id"];

/// Known category and difficulty labels, used both to pull filters out of a
/// question and to validate explicit filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub categories: Vec<String>,
    pub difficulties: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            categories: ["荤菜", "素菜", "汤品", "甜品", "早餐", "主食", "水产", "调料", "饮品"]
                .into_iter()
                .map(String::from)
                .collect(),
            difficulties: ["非常简单", "简单", "中等", "困难", "非常困难"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Vocabulary {
    /// Derive filters from the raw question by substring match: the first
    /// category found, and the longest difficulty found (so "非常简单" is not
    /// read as "简单").
    pub fn extract_filters(&self, question: &str) -> Filters {
        let mut filters = Filters::new();

        if let Some(category) = self.categories.iter().find(|c| question.contains(c.as_str())) {
            filters.insert("category".to_string(), FilterValue::from(category.as_str()));
        }

        let mut difficulties: Vec<&String> = self.difficulties.iter().collect();
        difficulties.sort_by_key(|d| std::cmp::Reverse(d.chars().count()));
        if let Some(difficulty) = difficulties.into_iter().find(|d| question.contains(d.as_str())) {
            filters.insert("difficulty".to_string(), FilterValue::from(difficulty.as_str()));
        }

        filters
    }

    /// Reject filters on unsupported keys, or category/difficulty values
    /// outside the vocabulary.
    pub fn validate_filters(&self, filters: &Filters) -> Result<()> {
        for (key, value) in filters {
            if !SUPPORTED_FILTER_KEYS.contains(&key.as_str()) {
                return Err(EngineError::Validation(format!(
                    "unsupported filter key: {key}"
                )));
            }
            let known = match key.as_str() {
                "category" => &self.categories,
                "difficulty" => &self.difficulties,
                _ => continue,
            };
            let values: Vec<&Value> = match value {
                FilterValue::One(v) => vec![v],
                FilterValue::AnyOf(vs) => vs.iter().collect(),
            };
            for v in values {
                let label = v.as_str().unwrap_or_default();
                if !known.iter().any(|k| k == label) {
                    return Err(EngineError::Validation(format!(
                        "unknown {key}: {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Whether every filter key is present in the chunk's metadata with an
/// accepted value. A missing key never matches.
pub fn matches(chunk: &Chunk, filters: &Filters) -> bool {
    filters.iter().all(|(key, expected)| {
        chunk
            .metadata
            .get(key)
            .is_some_and(|actual| expected.accepts(actual))
    })
}

/// Keep chunks matching every filter, in order, stopping at `k` matches.
pub fn filter_by_metadata(chunks: Vec<Chunk>, filters: &Filters, k: usize) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|chunk| matches(chunk, filters))
        .take(k)
        .collect()
}
