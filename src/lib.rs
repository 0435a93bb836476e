//! # recipe-rag
//!
//! Answers natural-language recipe questions by routing them to a handling
//! strategy, retrieving recipes with a hybrid BM25 + vector pipeline, and
//! generating the answer with an LLM.
//!
//! ## Architecture
//!
//! ```text
//!                          ┌──────────────┐
//!                          │   Question   │
//!                          └──────┬───────┘
//!                                 ▼
//!                      ┌─────────────────────┐
//!                      │  Query Router (LLM) │
//!                      │ chat/list/detail/gen│
//!                      └──────────┬──────────┘
//!                 chat            │ list / detail / general
//!            ┌────────────────────┤
//!            │                    ▼
//!            │        ┌──────────────────────┐    ┌────────────────────┐
//!            │        │ Query Rewriter (LLM) │    │ Filters from raw   │
//!            │        └──────────┬───────────┘    │ question (category,│
//!            │                   │                │ difficulty)        │
//!            │         ┌─────────┴─────────┐      └─────────┬──────────┘
//!            │         ▼                   ▼                │
//!            │  ┌─────────────┐     ┌─────────────┐         │
//!            │  │ BM25 (jieba)│     │   Vector    │         │
//!            │  │             │     │ ≥ threshold │         │
//!            │  └──────┬──────┘     └──────┬──────┘         │
//!            │         │ dedup by recipe   │ dedup          │
//!            │         └─────────┬─────────┘                │
//!            │                   ▼                          │
//!            │     ┌───────────────────────────┐            │
//!            │     │ Weighted RRF              │            │
//!            │     │ vector ×3.0, bm25 ×0.5    │            │
//!            │     └─────────────┬─────────────┘            │
//!            │                   ▼                          │
//!            │     ┌───────────────────────────┐            │
//!            │     │ Metadata filter (3×k pool)│◄───────────┘
//!            │     │ or top-k                  │
//!            │     └─────────────┬─────────────┘
//!            │                   ▼
//!            │          parent recipes
//!            ▼                   ▼
//!      ┌──────────────────────────────────────┐
//!      │ Answer pipeline (sync or streaming)  │
//!      │ chat · list (local) · detail · basic │
//!      └──────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the server, LLM and retrieval tuning
//! - [`error`] - `EngineError` with stable machine-readable kinds
//! - [`models`] - Shared data types: `Chunk`, `ParentDocument`, `RouteType`, filters, answers
//! - [`corpus`] - Recipe documents and chunks loaded from `corpus.json`, statistics
//! - [`search::tokenizer`] - jieba search-mode segmentation as a tantivy tokenizer
//! - [`search::bm25`] - In-memory BM25 index powered by tantivy
//! - [`search::vector`] - Vector store with cosine similarity and disk persistence
//! - [`search::dedup`] - One chunk per recipe
//! - [`search::fusion`] - Weighted Reciprocal Rank Fusion keyed by content hash
//! - [`search::filter`] - Vocabulary-based filter extraction and metadata filtering
//! - [`search::retriever`] - Concurrent hybrid retrieval
//! - [`llm`] - Text generation, streaming, embeddings, prompts, routing, rewriting and vision
//! - [`answer`] - Per-route answer strategies, synchronous and streaming
//! - [`engine`] - `RecipeEngine`, the composed question-answering pipeline
//! - [`state`] - One-time engine construction and shared application state
//! - [`api`] - Axum HTTP handlers

pub mod answer;
pub mod api;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
