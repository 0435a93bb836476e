use axum::extract::State;
use axum::Json;

use crate::api::ApiError;
use crate::models::{CategorySearchRequest, CategorySearchResponse, Statistics};
use crate::state::AppState;

/// POST /api/search - Dish names in a category, ranked for an optional query.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<CategorySearchRequest>,
) -> Result<Json<CategorySearchResponse>, ApiError> {
    let engine = state.engine.get()?;
    let category = req.category.trim().to_string();
    let dishes = engine
        .search_by_category(&category, req.query.as_deref())
        .await?;
    Ok(Json(CategorySearchResponse { category, dishes }))
}

/// GET /api/categories
pub async fn categories(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let engine = state.engine.get()?;
    Ok(Json(engine.categories().to_vec()))
}

/// GET /api/difficulties
pub async fn difficulties(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let engine = state.engine.get()?;
    Ok(Json(engine.difficulties().to_vec()))
}

/// GET /api/stats - Knowledge base statistics
pub async fn stats(State(state): State<AppState>) -> Result<Json<Statistics>, ApiError> {
    let engine = state.engine.get()?;
    Ok(Json(engine.statistics()))
}
