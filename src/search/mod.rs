pub mod bm25;
pub mod dedup;
pub mod filter;
pub mod fusion;
pub mod retriever;
pub mod tokenizer;
pub mod vector;
