pub mod chat_stream;
pub mod client;
pub mod embeddings;
pub mod prompts;
pub mod rewrite;
pub mod router;
pub mod vision;
