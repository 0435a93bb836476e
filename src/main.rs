use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use recipe_rag::api;
use recipe_rag::config::Config;
use recipe_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    // Missing credentials are fatal before anything is served.
    config.validate()?;

    let state = AppState::new(config.clone());

    // Build indexes in the background; requests get 503 until ready.
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.get_or_init().await {
            tracing::error!("Failed to build recipe engine: {e}");
            std::process::exit(1);
        }
    });

    let app = Router::new()
        .route("/api/ask", post(api::ask::ask))
        .route("/api/ask_stream", post(api::ask::ask_stream))
        .route("/api/search", post(api::recipes::search))
        .route("/api/categories", get(api::recipes::categories))
        .route("/api/difficulties", get(api::recipes::difficulties))
        .route("/api/stats", get(api::recipes::stats))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
