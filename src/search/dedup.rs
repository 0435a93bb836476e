use std::collections::HashSet;

use crate::models::Chunk;

/// Collapse a ranked list to one chunk per recipe, keeping the best-ranked
/// instance. The key is `parent_id`, falling back to `dish_name`; chunks with
/// neither are always kept.
pub fn dedup_by_parent(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| match chunk.parent_key() {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}
