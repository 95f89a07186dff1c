pub mod health;
pub mod papers;
pub mod similarity;

use axum::{
    routing::{get, post},
    Router,
};

use crate::middleware::{auth::require_teacher, rate_limit};
use crate::AppState;

/// Every API route. Generation routes share one rate-limit window; everything under
/// `/api` needs the teacher header.
pub fn router(state: AppState, generate_rps: u32) -> Router {
    let generation = Router::new()
        .route("/api/papers/generate", post(papers::generate_paper))
        .route("/api/papers/:id/regenerate", post(papers::regenerate_paper))
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::RateLimiter::new(generate_rps),
            rate_limit::rps_middleware,
        ));

    let papers_api = Router::new()
        .route(
            "/api/papers/:id",
            get(papers::get_paper).delete(papers::delete_paper),
        )
        .route("/api/papers/:id/approve", post(papers::approve_paper))
        .route("/api/similarity/stats", get(similarity::index_stats))
        .merge(generation)
        .layer(axum::middleware::from_fn(require_teacher));

    Router::new()
        .route("/health", get(health::health))
        .merge(papers_api)
        .with_state(state)
}
