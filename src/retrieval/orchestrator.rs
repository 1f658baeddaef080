//! Cascading retrieval orchestrator.
//!
//! Three stages run in fixed order, each on the previous stage's survivors:
//!
//! 1. name/pattern match over locators (cheap, in-memory),
//! 2. keyword match over the FTS5 index,
//! 3. vector similarity against the survivors' embeddings only.
//!
//! The final set is read from the chunk store, scored by the [`Scorer`], and
//! the top-K returned. Everything here reads a pinned [`IndexGeneration`];
//! nothing is mutated, so cancelling a query at any point is safe.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::embedding::{cosine, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::index::names::NamePattern;
use crate::index::{FragmentMeta, IndexGeneration};
use crate::memory::taxonomy::IntentTags;
use crate::memory::truncate_preview;
use crate::memory::types::{FragmentId, MemoryClass};
use crate::retrieval::scorer::{Candidate, Scorer};
use crate::store::ChunkStore;

const PREVIEW_CHARS: usize = 160;

/// Which stages a caller wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub names: bool,
    pub keywords: bool,
    pub vectors: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            names: true,
            keywords: true,
            vectors: true,
        }
    }
}

impl StageToggles {
    /// Disable stages by name (`names`, `keywords`, `vectors`).
    pub fn without(mut self, stages: &[String]) -> Result<Self, String> {
        for stage in stages {
            match stage.as_str() {
                "names" | "name" => self.names = false,
                "keywords" | "keyword" => self.keywords = false,
                "vectors" | "vector" => self.vectors = false,
                other => return Err(format!("unknown stage: {other}")),
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict the universe to these classes. `None` searches all.
    pub memory_classes: Option<Vec<MemoryClass>>,
    pub top_k: Option<usize>,
    /// The caller's own classification of the query, for the intent bonus.
    pub intent: Option<IntentTags>,
    pub stages: StageToggles,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub fragment_id: FragmentId,
    pub score: f64,
    pub source_locator: String,
    pub memory_class: MemoryClass,
    /// Cosine similarity from the vector stage, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub preview: String,
    #[serde(skip)]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Candidate counts per stage. `None` means the stage did not run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageCounts {
    pub universe: usize,
    pub names: Option<usize>,
    pub keywords: Option<usize>,
    pub vectors: Option<usize>,
    pub scored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub generation: u64,
    pub hits: Vec<SearchHit>,
    pub stage_counts: StageCounts,
}

/// Borrowed view of everything a query needs besides the index generation.
pub struct Orchestrator<'a> {
    store: &'a ChunkStore,
    embedder: &'a dyn EmbeddingProvider,
    scorer: &'a Scorer,
    config: &'a RetrievalConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a ChunkStore,
        embedder: &'a dyn EmbeddingProvider,
        scorer: &'a Scorer,
        config: &'a RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            scorer,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(query = %request.query, generation = generation.number))]
    pub fn search(
        &self,
        generation: &IndexGeneration,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, RetrievalError> {
        let top_k = request.top_k.unwrap_or(self.config.default_top_k);
        let mut counts = StageCounts::default();

        let universe: HashSet<&FragmentId> = generation
            .catalog
            .values()
            .filter(|m| {
                request
                    .memory_classes
                    .as_ref()
                    .is_none_or(|classes| classes.contains(&m.class))
            })
            .map(|m| &m.id)
            .collect();
        counts.universe = universe.len();

        if top_k == 0 || universe.is_empty() {
            return Ok(empty_outcome(generation, counts));
        }

        // Stage 1: names.
        check(cancel)?;
        let mut from_names: Option<HashSet<&FragmentId>> = None;
        if request.stages.names {
            let pattern = NamePattern::from_query(&request.query, self.scorer)?;
            if !pattern.is_empty() {
                let matched = generation.names.lookup(&pattern);
                let s1: HashSet<&FragmentId> = universe
                    .iter()
                    .copied()
                    .filter(|id| matched.contains(*id))
                    .collect();
                counts.names = Some(s1.len());
                if !s1.is_empty() {
                    from_names = Some(s1);
                }
            }
        }

        // Stage 2: keywords, over S1 if it found anything, else the universe.
        check(cancel)?;
        let input = from_names.unwrap_or_else(|| universe.clone());
        let survivors = if request.stages.keywords {
            let terms: Vec<String> = self.scorer.terms(&request.query).into_iter().collect();
            let hits = generation.keyword.search(&terms)?;
            let s2: HashSet<&FragmentId> = input
                .iter()
                .copied()
                .filter(|id| hits.contains(*id))
                .collect();
            counts.keywords = Some(s2.len());
            if s2.is_empty() && counts.names.is_some_and(|n| n > 0) {
                tracing::debug!("keyword stage empty, keeping name matches");
                input
            } else {
                s2
            }
        } else {
            input
        };

        // Stage 3: vectors, over the stage-2 survivors only.
        check(cancel)?;
        let mut similarity: BTreeMap<&FragmentId, f32> = BTreeMap::new();
        let finalists: Vec<&FragmentId> = if request.stages.vectors && !survivors.is_empty() {
            let ranked = self.vector_stage(generation, &request.query, &survivors)?;
            counts.vectors = Some(ranked.len());
            ranked
                .into_iter()
                .map(|(id, sim)| {
                    similarity.insert(id, sim);
                    id
                })
                .collect()
        } else {
            let mut ids: Vec<&FragmentId> = survivors.into_iter().collect();
            ids.sort();
            ids
        };

        // Score.
        let mut hits = Vec::with_capacity(finalists.len());
        for id in finalists {
            check(cancel)?;
            let (Some(meta), Some(entry)) = (generation.catalog.get(id), generation.offsets.get(id))
            else {
                continue;
            };
            let fragment = self.store.read_entry(id, entry)?;
            let breakdown = self.scorer.breakdown(
                &request.query,
                Candidate {
                    text: &fragment.text,
                    locator: &meta.locator,
                    tags: meta.tags.as_ref(),
                },
                request.intent.as_ref(),
            );
            hits.push(hit(meta, breakdown.total, similarity.get(id).copied(), &fragment.text));
        }
        counts.scored = hits.len();

        hits.sort_by(rank);
        hits.truncate(top_k);

        tracing::debug!(
            universe = counts.universe,
            names = ?counts.names,
            keywords = ?counts.keywords,
            vectors = ?counts.vectors,
            returned = hits.len(),
            "search complete"
        );

        Ok(SearchOutcome {
            generation: generation.number,
            hits,
            stage_counts: counts,
        })
    }

    /// Cosine similarity of the query against each survivor, keeping the
    /// `vector_candidates` best. Fails fast when vectors are missing.
    fn vector_stage<'g>(
        &self,
        generation: &'g IndexGeneration,
        query: &str,
        survivors: &HashSet<&'g FragmentId>,
    ) -> Result<Vec<(&'g FragmentId, f32)>, RetrievalError> {
        if generation.vectors.is_empty() {
            return Err(RetrievalError::IndexUnavailable(
                "vector index is not loaded".into(),
            ));
        }

        let query_vector = self
            .embedder
            .embed(query)
            .map_err(|e| RetrievalError::EmbeddingServiceUnavailable(format!("{e:#}")))?;
        if query_vector.len() != generation.vectors.dim() {
            return Err(RetrievalError::EmbeddingServiceUnavailable(format!(
                "query embedding has {} dimensions, index expects {}",
                query_vector.len(),
                generation.vectors.dim()
            )));
        }

        let mut ranked = Vec::with_capacity(survivors.len());
        for id in survivors {
            let vector = generation.vectors.get(id).ok_or_else(|| {
                RetrievalError::IndexUnavailable(format!("no vector loaded for fragment {id}"))
            })?;
            ranked.push((*id, cosine(&query_vector, vector)));
        }

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(self.config.vector_candidates);
        Ok(ranked)
    }
}

fn check(cancel: &CancellationToken) -> Result<(), RetrievalError> {
    if cancel.is_cancelled() {
        Err(RetrievalError::Cancelled)
    } else {
        Ok(())
    }
}

fn empty_outcome(generation: &IndexGeneration, counts: StageCounts) -> SearchOutcome {
    SearchOutcome {
        generation: generation.number,
        hits: Vec::new(),
        stage_counts: counts,
    }
}

fn hit(meta: &FragmentMeta, score: f64, similarity: Option<f32>, text: &str) -> SearchHit {
    SearchHit {
        fragment_id: meta.id.clone(),
        score,
        source_locator: meta.locator.clone(),
        memory_class: meta.class,
        similarity,
        preview: truncate_preview(text, PREVIEW_CHARS),
        created_at: meta.created_at,
    }
}

/// Score desc, then class priority desc, then newest first, then id.
fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.memory_class
                .priority_weight()
                .partial_cmp(&a.memory_class.priority_weight())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.fragment_id.cmp(&b.fragment_id))
}
