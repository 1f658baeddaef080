//! Typed errors surfaced at the retrieval boundary.
//!
//! Everything below the boundary uses `anyhow`; callers of
//! [`Orchestrator::search`](crate::retrieval::orchestrator::Orchestrator::search) need to tell "the engine could
//! not search" apart from "nothing relevant found" (an empty `Ok`), so those
//! failures get their own variants here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// No index generation is published, or the vector index is not loaded.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The embedding collaborator failed or timed out.
    #[error("embedding service unavailable: {0}")]
    EmbeddingServiceUnavailable(String),

    /// A positioned read returned bytes that do not decode to the expected record.
    #[error("corrupt offset table entry for {id}: {reason}")]
    CorruptOffsetTable { id: String, reason: String },

    /// Vector index and offset table no longer correspond 1:1.
    #[error("index inconsistent: {vectors} vectors vs {offsets} offsets")]
    IndexInconsistent { vectors: usize, offsets: usize },

    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RetrievalError {
    /// Unavailability errors are worth a retry by the caller; integrity errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EmbeddingServiceUnavailable(_))
    }
}

impl From<rusqlite::Error> for RetrievalError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}
