use crate::error::{Error, Result};
use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` client.
#[derive(Clone)]
pub struct EmbedService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl EmbedService {
    pub fn new(
        client: Client,
        api_key: String,
        base_url: String,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
            timeout,
        }
    }

    async fn request(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbReq<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(serde::Deserialize)]
        struct EmbData {
            embedding: Vec<f32>,
            #[serde(default)]
            index: Option<usize>,
        }
        #[derive(serde::Deserialize)]
        struct EmbResp {
            data: Vec<EmbData>,
        }

        let body = EmbReq {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("embeddings request failed")?;

        let status = resp.status();
        let txt = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("embeddings status {}: {}", status.as_u16(), txt);
        }
        let mut parsed: EmbResp = serde_json::from_str(&txt).context("embeddings parse failed")?;
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbedService {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(texts)
            .await
            .map_err(|e| Error::ExternalService(format!("Embedding service error: {:#}", e)))?;

        if vectors.len() != texts.len() {
            return Err(Error::ExternalService(format!(
                "Embedding service returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::ExternalService(format!(
                "Embedding service returned {}-dimensional vector, expected {}",
                bad.len(),
                self.dimension
            )));
        }
        Ok(vectors)
    }
}
