//! Offline embedding provider based on signed feature hashing.
//!
//! Each lemmatized token is hashed (SHA-256) into one of `dimensions`
//! buckets with a sign bit; the bag is L2-normalized. Texts sharing terms
//! land close together, which is enough for the vector stage to narrow a
//! keyword-filtered candidate set when no embedding server is running.

use anyhow::Result;
use sha2::{Digest, Sha256};

use super::{l2_normalize, EmbeddingProvider};
use crate::retrieval::scorer::{lemmatize, tokenize};

pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let term = lemmatize(&token);
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
