//! Text-to-vector embedding collaborators.
//!
//! Provides the [`EmbeddingProvider`] trait, an HTTP client for
//! OpenAI-compatible embedding servers, and an offline feature-hashing
//! provider. The provider is created via [`create_provider`] from configuration.

pub mod hashing;
pub mod http;

use anyhow::Result;

/// Default number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`dimensions`](Self::dimensions)
/// entries. All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched requests.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
///
/// `"http"` talks to an OpenAI-compatible `/v1/embeddings` endpoint;
/// `"hashing"` runs offline with no model at all.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "http" => Ok(Box::new(http::HttpEmbeddingProvider::new(config)?)),
        "hashing" => Ok(Box::new(hashing::HashingEmbeddingProvider::new(
            config.dimensions,
        ))),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: http, hashing"),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two L2-normalized vectors (a plain dot product).
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
