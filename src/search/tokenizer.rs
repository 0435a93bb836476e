//! Chinese word segmentation for the BM25 index.
//!
//! Recipe text has no spaces between words, so both indexing and querying go
//! through jieba's search-mode segmenter, which also emits the shorter words
//! contained in long compounds ("宫保鸡丁" → "宫保", "鸡丁", "宫保鸡丁").

use std::sync::OnceLock;

use jieba_rs::Jieba;
use tantivy::tokenizer::{Token, TokenStream, Tokenizer};

/// Name the tokenizer is registered under in the tantivy index.
pub const TOKENIZER_NAME: &str = "jieba_search";

fn dictionary() -> &'static Jieba {
    static JIEBA: OnceLock<Jieba> = OnceLock::new();
    JIEBA.get_or_init(Jieba::new)
}

/// Segment `text` into (byte offset, byte length, term) triples. Terms are
/// lowercased; whitespace and punctuation-only pieces are dropped.
fn segment_with_offsets(text: &str) -> Vec<(usize, usize, String)> {
    let base = text.as_ptr() as usize;
    dictionary()
        .cut_for_search(text, true)
        .into_iter()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .map(|word| (word.as_ptr() as usize - base, word.len(), word.to_lowercase()))
        .collect()
}

/// Segment `text` into index terms, in order, duplicates included.
pub fn segment(text: &str) -> Vec<String> {
    segment_with_offsets(text)
        .into_iter()
        .map(|(_, _, word)| word)
        .collect()
}

#[derive(Clone, Default)]
pub struct JiebaTokenizer;

pub struct JiebaTokenStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Tokenizer for JiebaTokenizer {
    type TokenStream<'a> = JiebaTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> JiebaTokenStream {
        let tokens = segment_with_offsets(text)
            .into_iter()
            .enumerate()
            .map(|(position, (offset_from, len, word))| Token {
                offset_from,
                offset_to: offset_from + len,
                position,
                text: word,
                position_length: 1,
            })
            .collect();
        JiebaTokenStream { tokens, cursor: 0 }
    }
}

impl TokenStream for JiebaTokenStream {
    fn advance(&mut self) -> bool {
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.cursor - 1]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.cursor - 1]
    }
}
