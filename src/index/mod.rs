//! Index layer: immutable index generations and the handle that swaps them.
//!
//! A generation bundles everything a query needs: the offset table and
//! vector snapshots, the catalog of findable fragments, and the name,
//! keyword and dependency indexes. Writers build a complete generation and
//! publish it with one atomic pointer swap; readers take an `Arc` snapshot
//! and never lock.

pub mod keyword;
pub mod names;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::code::graph::DependencyGraph;
use crate::error::RetrievalError;
use crate::memory::taxonomy::IntentTags;
use crate::memory::types::{CodeMeta, Fragment, FragmentId, MemoryClass, Retention};
use crate::store::offsets::OffsetTable;
use crate::store::vectors::VectorIndex;

use self::keyword::KeywordIndex;
use self::names::NameIndex;

/// What the index layer keeps about a fragment. Text stays on disk.
#[derive(Debug, Clone)]
pub struct FragmentMeta {
    pub id: FragmentId,
    pub class: MemoryClass,
    pub locator: String,
    pub tags: Option<IntentTags>,
    pub code: Option<CodeMeta>,
    /// Session record the fragment came from, for raw and consolidated entries.
    pub record_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Fragment> for FragmentMeta {
    fn from(fragment: &Fragment) -> Self {
        Self {
            id: fragment.id.clone(),
            class: fragment.class,
            locator: fragment.locator.clone(),
            tags: fragment.tags,
            code: fragment.code.clone(),
            record_id: fragment.session.as_ref().map(|s| s.record_id.clone()),
            created_at: fragment.created_at,
        }
    }
}

/// Retention state that decides which stored fragments are findable.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    /// Newest code-indexing run; older code units are superseded.
    pub latest_code_run: Option<u64>,
    /// Session records already consolidated; their raw fragments retire.
    pub processed_records: HashSet<String>,
}

impl Liveness {
    pub fn is_live(&self, meta: &FragmentMeta) -> bool {
        match meta.class.retention() {
            Retention::Permanent => true,
            Retention::Session => meta
                .record_id
                .as_ref()
                .is_none_or(|r| !self.processed_records.contains(r)),
            Retention::Temporary => match (&meta.code, self.latest_code_run) {
                (Some(code), Some(latest)) => code.run >= latest,
                _ => true,
            },
        }
    }

    /// Fold newly stored fragments into the retention state.
    pub fn observe<'a>(&mut self, metas: impl IntoIterator<Item = &'a FragmentMeta>) {
        for meta in metas {
            if let Some(code) = &meta.code {
                self.latest_code_run = Some(self.latest_code_run.map_or(code.run, |r| r.max(code.run)));
            }
        }
    }
}

/// One immutable, fully built index generation.
#[derive(Debug)]
pub struct IndexGeneration {
    pub number: u64,
    pub offsets: OffsetTable,
    pub vectors: VectorIndex,
    /// Findable fragments only; retired ones stay in offsets and vectors.
    pub catalog: HashMap<FragmentId, FragmentMeta>,
    pub names: NameIndex,
    pub keyword: Arc<KeywordIndex>,
    pub graph: Arc<DependencyGraph>,
    pub liveness: Liveness,
    pub built_at: DateTime<Utc>,
}

impl IndexGeneration {
    /// Assemble a generation from stored metadata. The catalog, name index
    /// and graph are derived here; the graph is only rebuilt when the set of
    /// live code units changed.
    pub fn assemble(
        number: u64,
        offsets: OffsetTable,
        vectors: VectorIndex,
        metas: impl IntoIterator<Item = FragmentMeta>,
        keyword: Arc<KeywordIndex>,
        liveness: Liveness,
        previous_graph: Option<(&Arc<DependencyGraph>, &HashMap<FragmentId, FragmentMeta>)>,
    ) -> Self {
        let catalog: HashMap<FragmentId, FragmentMeta> = metas
            .into_iter()
            .filter(|m| liveness.is_live(m))
            .map(|m| (m.id.clone(), m))
            .collect();

        let names = NameIndex::build(catalog.values().map(|m| (&m.id, m.locator.as_str())));

        let graph = match previous_graph {
            Some((graph, old_catalog)) if same_code_units(old_catalog, &catalog) => Arc::clone(graph),
            _ => Arc::new(DependencyGraph::build(
                catalog
                    .values()
                    .filter_map(|m| m.code.as_ref().map(|c| (&m.id, c))),
            )),
        };

        Self {
            number,
            offsets,
            vectors,
            catalog,
            names,
            keyword,
            graph,
            liveness,
            built_at: Utc::now(),
        }
    }

    /// Vector index and offset table must be in 1:1 correspondence.
    pub fn verify(&self) -> Result<(), RetrievalError> {
        if self.vectors.len() != self.offsets.len() {
            return Err(RetrievalError::IndexInconsistent {
                vectors: self.vectors.len(),
                offsets: self.offsets.len(),
            });
        }
        if let Some((id, _)) = self.offsets.iter().find(|(id, _)| !self.vectors.contains(id)) {
            tracing::error!(id = %id, "offset entry without a vector");
            return Err(RetrievalError::IndexInconsistent {
                vectors: self.vectors.len(),
                offsets: self.offsets.len(),
            });
        }
        Ok(())
    }

    pub fn class_counts(&self) -> BTreeMap<MemoryClass, usize> {
        let mut counts = BTreeMap::new();
        for meta in self.catalog.values() {
            *counts.entry(meta.class).or_insert(0) += 1;
        }
        counts
    }
}

fn same_code_units(
    old: &HashMap<FragmentId, FragmentMeta>,
    new: &HashMap<FragmentId, FragmentMeta>,
) -> bool {
    let code_ids = |c: &HashMap<FragmentId, FragmentMeta>| -> HashSet<FragmentId> {
        c.values()
            .filter(|m| m.code.is_some())
            .map(|m| m.id.clone())
            .collect()
    };
    code_ids(old) == code_ids(new)
}

/// Snapshot counters for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub findable: usize,
    pub stored: usize,
    pub vectors: usize,
    pub by_class: BTreeMap<String, usize>,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub keyword_file: String,
}

impl From<&IndexGeneration> for IndexStatus {
    fn from(g: &IndexGeneration) -> Self {
        Self {
            generation: g.number,
            built_at: g.built_at,
            findable: g.catalog.len(),
            stored: g.offsets.len(),
            vectors: g.vectors.len(),
            by_class: g
                .class_counts()
                .into_iter()
                .map(|(class, n)| (class.as_str().to_string(), n))
                .collect(),
            graph_nodes: g.graph.node_count(),
            graph_edges: g.graph.edge_count(),
            keyword_file: g.keyword.path().display().to_string(),
        }
    }
}

/// The active-generation pointer shared by readers and writers.
#[derive(Debug)]
pub struct IndexHandle {
    active: ArcSwapOption<IndexGeneration>,
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::empty()
    }
}

impl IndexHandle {
    pub fn empty() -> Self {
        Self {
            active: ArcSwapOption::empty(),
        }
    }

    /// Current generation, or `IndexUnavailable` before the first publish.
    pub fn current(&self) -> Result<Arc<IndexGeneration>, RetrievalError> {
        self.active.load_full().ok_or_else(|| {
            RetrievalError::IndexUnavailable("no index generation has been published".into())
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.active.load().is_some()
    }

    /// Verify and swap in `generation`. On failure the previous generation
    /// keeps serving.
    pub fn publish(&self, generation: IndexGeneration) -> Result<Arc<IndexGeneration>, RetrievalError> {
        generation.verify()?;
        let generation = Arc::new(generation);
        let previous = self.active.swap(Some(Arc::clone(&generation)));

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous.keyword, &generation.keyword) {
                previous.keyword.retire();
            }
        }

        tracing::info!(
            generation = generation.number,
            findable = generation.catalog.len(),
            stored = generation.offsets.len(),
            "index generation published"
        );
        Ok(generation)
    }
}
