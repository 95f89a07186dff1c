use axum::extract::DefaultBodyLimit;
use exam_paper_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware::cors::permissive_cors,
    routes,
    services::similarity_index::SimilarityIndex,
    AppState,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let index = SimilarityIndex::load(
        Path::new(&config.similarity_index_path),
        config.embedding_dimension,
    )
    .await;
    info!(
        questions = index.len(),
        dimension = index.dimension(),
        "Similarity index ready"
    );

    let app_state = AppState::new(pool, Arc::new(index), config)?;

    let app = routes::router(app_state, config.generate_rps)
        .layer(permissive_cors())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
