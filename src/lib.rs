pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::{
    ai_service::{ChatCompletionsClient, TextGenerator},
    embed_service::{EmbedService, Embedder},
    paper_store::{PaperStore, PgPaperStore},
    pipeline::{PaperGenerator, PipelineSettings},
    similarity_index::SimilarityIndex,
};
use reqwest::Client;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaperStore>,
    pub generator: PaperGenerator,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<SimilarityIndex>,
    pub index_path: PathBuf,
    /// Serializes index mutations with their snapshot writes.
    pub index_writes: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn new(pool: PgPool, index: Arc<SimilarityIndex>, config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm_timeout_secs);
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        let text_generator = ChatCompletionsClient::new(
            http_client.clone(),
            config.llm_api_key.clone(),
            config.llm_base_url.clone(),
            config.llm_model.clone(),
            config.llm_temperature,
            timeout,
        );
        let embedder = EmbedService::new(
            http_client,
            config.embedding_api_key.clone(),
            config.embedding_base_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
            timeout,
        );

        Ok(Self::from_parts(
            Arc::new(PgPaperStore::new(pool)),
            Arc::new(text_generator),
            Arc::new(embedder),
            index,
            PipelineSettings::from(config),
            PathBuf::from(&config.similarity_index_path),
        ))
    }

    /// Wires the pipeline over arbitrary collaborators; the HTTP tests use this with
    /// in-memory doubles.
    pub fn from_parts(
        store: Arc<dyn PaperStore>,
        text_generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        index: Arc<SimilarityIndex>,
        settings: PipelineSettings,
        index_path: PathBuf,
    ) -> Self {
        let generator = PaperGenerator::new(
            store.clone(),
            text_generator,
            embedder.clone(),
            index.clone(),
            settings,
        );
        Self {
            store,
            generator,
            embedder,
            index,
            index_path,
            index_writes: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}
