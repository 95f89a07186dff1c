use axum::{extract::State, response::IntoResponse, Json};

use crate::AppState;

#[axum::debug_handler]
pub async fn index_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.index.stats())
}
