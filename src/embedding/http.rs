//! Embedding client for OpenAI-compatible `/v1/embeddings` servers
//! (llama-server `--embedding`, text-embeddings-inference, vLLM, ...).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;

pub struct HttpEmbeddingProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;

        tracing::info!(endpoint = %config.endpoint, model = %config.model, "embedding client ready");

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("embedding server returned no vectors")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .with_context(|| format!("embedding request to {} failed", self.endpoint))?;

        anyhow::ensure!(
            response.status().is_success(),
            "embedding server answered HTTP {}",
            response.status()
        );

        let mut body: EmbeddingResponse = response
            .json()
            .context("embedding server returned malformed JSON")?;

        anyhow::ensure!(
            body.data.len() == texts.len(),
            "embedding server returned {} vectors for {} inputs",
            body.data.len(),
            texts.len()
        );

        body.data.sort_by_key(|d| d.index);
        body.data
            .into_iter()
            .map(|datum| {
                let mut v = datum.embedding;
                anyhow::ensure!(
                    v.len() == self.dimensions,
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    v.len()
                );
                l2_normalize(&mut v);
                Ok(v)
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
