use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::engine::RecipeEngine;
use crate::error::{EngineError, Result};

/// Owns the process's single [`RecipeEngine`].
///
/// The engine is built at most once: concurrent first callers of
/// [`EngineHandle::get_or_init`] wait on the same build and all receive the
/// same instance. A failed build leaves the handle empty so a later call can
/// try again.
pub struct EngineHandle {
    cell: OnceCell<Arc<RecipeEngine>>,
    config: Config,
}

impl EngineHandle {
    pub fn new(config: Config) -> Self {
        Self {
            cell: OnceCell::new(),
            config,
        }
    }

    /// The engine if it is already built. Never waits.
    pub fn get(&self) -> Result<Arc<RecipeEngine>> {
        self.cell.get().cloned().ok_or_else(|| {
            EngineError::RetrievalUnavailable("the recipe index is still being built".to_string())
        })
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get_or_init(&self) -> Result<Arc<RecipeEngine>> {
        self.get_or_init_with(|| RecipeEngine::build(&self.config))
            .await
    }

    /// Like [`EngineHandle::get_or_init`] with a caller-supplied build step.
    pub async fn get_or_init_with<F, Fut>(&self, build: F) -> Result<Arc<RecipeEngine>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RecipeEngine>>,
    {
        self.cell
            .get_or_try_init(|| async {
                tracing::info!("Building recipe engine");
                build().await.map(Arc::new)
            })
            .await
            .cloned()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<EngineHandle>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            engine: Arc::new(EngineHandle::new(config.clone())),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::corpus::Corpus;
    use crate::llm::testing::ScriptedGenerator;
    use crate::models::Chunk;
    use crate::search::bm25::LexicalIndex;
    use crate::search::vector::VectorIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoVectors;

    #[async_trait]
    impl VectorIndex for NoVectors {
        async fn search_with_scores(
            &self,
            _query: &str,
            _k: usize,
        ) -> anyhow::Result<Vec<(Chunk, f32)>> {
            Ok(Vec::new())
        }
    }

    async fn slow_build(builds: Arc<AtomicUsize>) -> Result<RecipeEngine> {
        builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let chunks = vec![Chunk::new("红烧肉 五花肉")];
        let lexical = LexicalIndex::build(chunks.clone()).map_err(EngineError::Internal)?;
        Ok(RecipeEngine::new(
            Corpus::new(Vec::new(), chunks),
            lexical,
            Arc::new(NoVectors),
            Arc::new(ScriptedGenerator::default()),
            RetrievalConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_unavailable_before_build() {
        let handle = EngineHandle::new(Config::default());
        let err = handle.get().err().unwrap();
        assert_eq!(err.kind(), "retrieval_unavailable");
        assert!(err.is_retryable());
        assert!(!handle.is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_builds_once() {
        let handle = Arc::new(EngineHandle::new(Config::default()));
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let builds = Arc::clone(&builds);
                tokio::spawn(async move {
                    handle
                        .get_or_init_with(|| slow_build(builds))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut engines = Vec::new();
        for task in tasks {
            engines.push(task.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        assert!(Arc::ptr_eq(&handle.get().unwrap(), &engines[0]));
    }

    #[tokio::test]
    async fn test_failed_build_can_be_retried() {
        let handle = EngineHandle::new(Config::default());
        let err = handle
            .get_or_init_with(|| async {
                Err(EngineError::Configuration("LLM_API_KEY missing".into()))
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "configuration_error");
        assert!(!handle.is_ready());

        let builds = Arc::new(AtomicUsize::new(0));
        handle
            .get_or_init_with(|| slow_build(Arc::clone(&builds)))
            .await
            .unwrap();
        assert!(handle.is_ready());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_build_rejects_missing_credentials() {
        let handle = EngineHandle::new(Config::default());
        let err = handle.get_or_init().await.err().unwrap();
        assert_eq!(err.kind(), "configuration_error");
    }
}
