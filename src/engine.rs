//! The long-lived engine handle.
//!
//! One [`Engine`] owns the chunk store, the active index generation, the raw
//! interaction log and the consolidation ledger. It is built once and shared
//! by `Arc` with the MCP server, the CLI and the consolidation scheduler;
//! nothing is reached through global state.
//!
//! Every write (ingest, rebuild, liveness refresh) runs under the publish
//! lock and ends with a new [`IndexGeneration`] swapped into the
//! [`IndexHandle`]. Searches only load the current generation and never take
//! that lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::code::expand::{expand, expand_hits, Expansion};
use crate::code::{scanner, unit_fragments};
use crate::config::RecollectConfig;
use crate::consolidation::ledger::{Ledger, LEDGER_FILE};
use crate::consolidation::rawlog::{episodic_fragment, RawLog};
use crate::consolidation::SessionState;
use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::index::keyword::{self, KeywordIndex};
use crate::index::{FragmentMeta, IndexGeneration, IndexHandle, IndexStatus, Liveness};
use crate::llm::IntentClassifier;
use crate::memory::taxonomy::IntentTags;
use crate::memory::types::{Fragment, FragmentId, MemoryClass, SessionRecord};
use crate::retrieval::orchestrator::{Orchestrator, SearchOutcome, SearchRequest};
use crate::retrieval::scorer::Scorer;
use crate::store::vectors::{self, VectorIndex};
use crate::store::{ChunkStore, VECTORS_FILE};

/// Texts per embedding request during ingest.
const EMBED_BATCH: usize = 32;
/// Fragments per keyword transaction during a rebuild.
const KEYWORD_BATCH: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub generation: u64,
    /// Fragments newly written to the log.
    pub stored: usize,
    /// Fragments whose id was already stored.
    pub deduplicated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub generation: u64,
    pub fragments: usize,
    pub embedded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeIndexReport {
    pub run: u64,
    pub modules: usize,
    pub units: usize,
    pub stored: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedInteraction {
    pub record_id: String,
    pub session_id: String,
    pub turn: usize,
    pub fragment_id: FragmentId,
    pub locator: String,
    pub tags: IntentTags,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedCorrection {
    pub fragment_id: FragmentId,
    pub locator: String,
    pub generation: u64,
    /// The same correction was already stored.
    pub deduplicated: bool,
}

/// A search and, optionally, the code context around its code hits, both
/// computed against the same generation.
#[derive(Debug, Clone, Serialize)]
pub struct ContextualSearch {
    #[serde(flatten)]
    pub outcome: SearchOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Expansion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationStatus {
    pub recorded: usize,
    pub processed: usize,
    pub sessions: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub index: IndexStatus,
    pub consolidation: ConsolidationStatus,
}

pub struct Engine {
    config: Arc<RecollectConfig>,
    dir: PathBuf,
    store: ChunkStore,
    index: IndexHandle,
    raw_log: RawLog,
    ledger: Mutex<Ledger>,
    /// Records seen per session, for turn numbers.
    turns: Mutex<HashMap<String, usize>>,
    embedder: Box<dyn EmbeddingProvider>,
    classifier: Box<dyn IntentClassifier>,
    scorer: Scorer,
    next_generation: AtomicU64,
    publish_lock: Mutex<()>,
    sweep_lock: Mutex<()>,
}

impl Engine {
    /// Open the data directory and publish the first generation.
    ///
    /// Persisted vectors and keyword rows are reused when they agree with the
    /// log; otherwise everything is rebuilt from the log.
    pub fn open(
        config: RecollectConfig,
        embedder: Box<dyn EmbeddingProvider>,
        classifier: Box<dyn IntentClassifier>,
    ) -> Result<Self> {
        let dir = config.resolved_data_dir();
        let store = ChunkStore::open(&dir)?;
        let raw_log = RawLog::open(&dir)?;
        let ledger = Ledger::load(&dir.join(LEDGER_FILE))?;

        let mut turns: HashMap<String, usize> = HashMap::new();
        for record in raw_log.read_all()? {
            *turns.entry(record.session_id).or_insert(0) += 1;
        }

        let keyword_files = keyword::existing_files(&dir)?;
        let next_generation = keyword_files.last().map_or(1, |(n, _)| n + 1);

        let engine = Self {
            scorer: Scorer::new(&config.scoring),
            config: Arc::new(config),
            dir,
            store,
            index: IndexHandle::empty(),
            raw_log,
            ledger: Mutex::new(ledger),
            turns: Mutex::new(turns),
            embedder,
            classifier,
            next_generation: AtomicU64::new(next_generation),
            publish_lock: Mutex::new(()),
            sweep_lock: Mutex::new(()),
        };
        engine.load_or_rebuild(keyword_files)?;
        Ok(engine)
    }

    /// [`open`](Self::open) with the embedder and classifier named in the config.
    ///
    /// The HTTP collaborators use blocking clients; call this off the async
    /// runtime (e.g. inside `spawn_blocking`).
    pub fn from_config(config: RecollectConfig) -> Result<Self> {
        let embedder = crate::embedding::create_provider(&config.embedding)
            .context("failed to create embedding provider")?;
        let classifier = crate::llm::create_classifier(&config.llm)
            .context("failed to create intent classifier")?;
        Self::open(config, embedder, classifier)
    }

    pub fn config(&self) -> &RecollectConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn raw_log(&self) -> &RawLog {
        &self.raw_log
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    fn lock_publish(&self) -> Result<MutexGuard<'_, ()>> {
        self.publish_lock
            .lock()
            .map_err(|e| anyhow!("publish lock poisoned: {e}"))
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|e| anyhow!("consolidation ledger lock poisoned: {e}"))
    }

    fn take_generation_number(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn load_or_rebuild(&self, keyword_files: Vec<(u64, PathBuf)>) -> Result<()> {
        let _guard = self.lock_publish()?;

        let Some(((number, path), stale)) = keyword_files.split_last() else {
            self.rebuild_locked(|_| {})?;
            return Ok(());
        };
        for (_, old) in stale {
            tracing::debug!(path = %old.display(), "removing superseded keyword index");
            keyword::remove_files(old);
        }

        match self.load_persisted(*number, path) {
            Ok(Some(generation)) => {
                let keyword = Arc::clone(&generation.keyword);
                match self.index.publish(generation) {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(error = %e, "persisted index rejected, rebuilding");
                        keyword.retire();
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "persisted index unreadable, rebuilding"),
        }
        self.rebuild_locked(|_| {})?;
        Ok(())
    }

    /// Generation from the files on disk, or `None` when they disagree with
    /// the log (the stale keyword file is then retired).
    fn load_persisted(&self, number: u64, keyword_path: &Path) -> Result<Option<IndexGeneration>> {
        let offsets = self.store.offsets()?;
        let keyword = KeywordIndex::open(keyword_path)?;
        let vectors = VectorIndex::load(&self.vectors_path(), self.embedder.dimensions())?;
        let indexed = keyword.count()?;

        let Some(vectors) = vectors.filter(|v| v.len() == offsets.len() && indexed == offsets.len()) else {
            tracing::warn!(
                offsets = offsets.len(),
                keyword = indexed,
                "persisted indexes do not match the log"
            );
            keyword.retire();
            return Ok(None);
        };

        let mut metas = Vec::with_capacity(offsets.len());
        self.store.scan(|fragment, _| {
            metas.push(FragmentMeta::from(&fragment));
            Ok(())
        })?;
        let liveness = self.liveness_from(&Liveness::default(), metas.iter())?;

        tracing::info!(generation = number, fragments = offsets.len(), "persisted index loaded");
        Ok(Some(IndexGeneration::assemble(
            number,
            offsets,
            vectors,
            metas,
            Arc::new(keyword),
            liveness,
            None,
        )))
    }

    /// `base` with the ledger's processed set and any newer code run folded in.
    fn liveness_from<'a>(
        &self,
        base: &Liveness,
        added: impl IntoIterator<Item = &'a FragmentMeta>,
    ) -> Result<Liveness> {
        let mut liveness = base.clone();
        liveness.processed_records = self.lock_ledger()?.processed().iter().cloned().collect();
        liveness.observe(added);
        Ok(liveness)
    }

    /// Run a query against the current generation.
    pub fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, RetrievalError> {
        let generation = self.index.current()?;
        self.orchestrator().search(&generation, request, cancel)
    }

    /// Search, then expand the code hits `expand_depth` hops when asked.
    pub fn search_with_context(
        &self,
        request: &SearchRequest,
        expand_depth: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<ContextualSearch, RetrievalError> {
        let generation = self.index.current()?;
        let outcome = self.orchestrator().search(&generation, request, cancel)?;
        let expansion = expand_depth
            .and_then(|depth| expand_hits(&generation, &outcome.hits, self.clamp_depth(depth)));
        Ok(ContextualSearch { outcome, expansion })
    }

    /// Dependency-graph context around `seeds`. `None` uses the configured
    /// default depth; any depth is capped at `max_expand_depth`.
    pub fn expand(&self, seeds: &[FragmentId], depth: Option<usize>) -> Result<Expansion, RetrievalError> {
        let generation = self.index.current()?;
        let depth = self.clamp_depth(depth.unwrap_or(self.config.retrieval.default_expand_depth));
        Ok(expand(&generation, seeds, depth))
    }

    fn clamp_depth(&self, depth: usize) -> usize {
        depth.min(self.config.retrieval.max_expand_depth)
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(
            &self.store,
            self.embedder.as_ref(),
            &self.scorer,
            &self.config.retrieval,
        )
    }

    pub fn ingest(&self, fragments: Vec<Fragment>) -> Result<IngestReport> {
        self.ingest_with_progress(fragments, |_| {})
    }

    /// Store `fragments` and publish a generation that can find them.
    ///
    /// Embedding happens before the publish lock is taken. `progress`
    /// receives the running count of embedded fragments.
    #[tracing::instrument(skip_all, fields(fragments = fragments.len()))]
    pub fn ingest_with_progress(
        &self,
        fragments: Vec<Fragment>,
        progress: impl FnMut(u64),
    ) -> Result<IngestReport> {
        let fragments = dedup_by_id(fragments);
        let embedded = self.embed_new(&fragments, progress)?;
        let guard = self.lock_publish()?;
        self.commit_ingest(&guard, fragments, embedded)
    }

    /// Embed the fragments the current generation has no vector for.
    fn embed_new(
        &self,
        fragments: &[Fragment],
        mut progress: impl FnMut(u64),
    ) -> Result<HashMap<FragmentId, Vec<f32>>> {
        let mut embedded: HashMap<FragmentId, Vec<f32>> = HashMap::new();
        let known = self.index.current().ok();
        let to_embed: Vec<&Fragment> = fragments
            .iter()
            .filter(|f| known.as_ref().is_none_or(|g| !g.vectors.contains(&f.id)))
            .collect();
        for chunk in to_embed.chunks(EMBED_BATCH) {
            let texts: Vec<&str> = chunk.iter().map(|f| f.text.as_str()).collect();
            let batch = self
                .embedder
                .embed_batch(&texts)
                .context("embedding failed during ingest")?;
            anyhow::ensure!(
                batch.len() == chunk.len(),
                "embedder returned {} vectors for {} texts",
                batch.len(),
                chunk.len()
            );
            for (fragment, vector) in chunk.iter().zip(batch) {
                embedded.insert(fragment.id.clone(), vector);
            }
            progress(embedded.len() as u64);
        }
        Ok(embedded)
    }

    /// Append, index and publish. The caller holds the publish lock.
    fn commit_ingest(
        &self,
        _publishing: &MutexGuard<'_, ()>,
        fragments: Vec<Fragment>,
        mut embedded: HashMap<FragmentId, Vec<f32>>,
    ) -> Result<IngestReport> {
        let current = self.index.current()?;
        let mut vectors = current.vectors.clone();
        // Built from the published table rather than the store's, so an entry
        // left behind by a failed ingest stays out until it is indexed.
        let mut offsets = current.offsets.clone();
        let mut added: Vec<&Fragment> = Vec::new();
        let mut deduplicated = 0;

        for fragment in &fragments {
            let outcome = self.store.append(fragment)?;
            // A stored fragment without a vector is left over from an ingest
            // that failed after the append; finish indexing it now.
            if outcome.deduplicated && vectors.contains(&fragment.id) {
                deduplicated += 1;
                continue;
            }
            let vector = match embedded.remove(&fragment.id) {
                Some(v) => v,
                None => self
                    .embedder
                    .embed(&fragment.text)
                    .context("embedding failed during ingest")?,
            };
            vectors.insert(fragment.id.clone(), vector)?;
            offsets.insert(fragment.id.clone(), outcome.entry);
            added.push(fragment);
        }

        if added.is_empty() {
            return Ok(IngestReport {
                generation: current.number,
                stored: 0,
                deduplicated,
            });
        }

        self.store.sync()?;
        vectors::append_records(
            &self.vectors_path(),
            vectors.dim(),
            added
                .iter()
                .filter_map(|f| vectors.get(&f.id).map(|v| (&f.id, v))),
        )?;
        current.keyword.insert(added.iter().copied())?;

        let new_metas: Vec<FragmentMeta> = added.iter().map(|f| FragmentMeta::from(*f)).collect();
        let liveness = self.liveness_from(&current.liveness, new_metas.iter())?;
        let generation = IndexGeneration::assemble(
            self.take_generation_number(),
            offsets,
            vectors,
            current.catalog.values().cloned().chain(new_metas),
            Arc::clone(&current.keyword),
            liveness,
            Some((&current.graph, &current.catalog)),
        );
        let published = self.index.publish(generation)?;

        Ok(IngestReport {
            generation: published.number,
            stored: added.len(),
            deduplicated,
        })
    }

    pub fn rebuild(&self) -> Result<RebuildReport> {
        self.rebuild_with_progress(|_| {})
    }

    /// Rebuild offsets, vectors, keyword index and graph from the log and
    /// publish the result. The previous generation serves until the swap;
    /// if anything fails it keeps serving.
    #[tracing::instrument(skip_all)]
    pub fn rebuild_with_progress(&self, progress: impl FnMut(u64)) -> Result<RebuildReport> {
        let _guard = self.lock_publish()?;
        self.rebuild_locked(progress)
    }

    fn rebuild_locked(&self, mut progress: impl FnMut(u64)) -> Result<RebuildReport> {
        let number = self.take_generation_number();
        let keyword = Arc::new(KeywordIndex::open(self.dir.join(keyword::file_name(number)))?);

        let current = self.index.current().ok();
        let from_disk = match current {
            Some(_) => None,
            None => VectorIndex::load(&self.vectors_path(), self.embedder.dimensions())
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "vector cache unreadable, embedding everything");
                    None
                }),
        };
        let cached = current.as_ref().map(|g| &g.vectors).or(from_disk.as_ref());

        let built = (|| -> Result<(IndexGeneration, usize)> {
            let mut metas = Vec::new();
            let mut batch: Vec<Fragment> = Vec::new();
            let mut seen = 0u64;
            let rebuilt = self.store.rebuild_index(self.embedder.as_ref(), cached, |fragment, _| {
                metas.push(FragmentMeta::from(fragment));
                batch.push(fragment.clone());
                if batch.len() >= KEYWORD_BATCH {
                    keyword.insert(batch.iter())?;
                    batch.clear();
                }
                seen += 1;
                progress(seen);
                Ok(())
            })?;
            keyword.insert(batch.iter())?;
            rebuilt.vectors.write_atomic(&self.vectors_path())?;

            let liveness = self.liveness_from(&Liveness::default(), metas.iter())?;
            let generation = IndexGeneration::assemble(
                number,
                rebuilt.offsets,
                rebuilt.vectors,
                metas,
                Arc::clone(&keyword),
                liveness,
                None,
            );
            Ok((generation, rebuilt.embedded))
        })();

        let published = built.and_then(|(generation, embedded)| {
            let published = self.index.publish(generation)?;
            Ok((published, embedded))
        });
        match published {
            Ok((generation, embedded)) => Ok(RebuildReport {
                generation: generation.number,
                fragments: generation.offsets.len(),
                embedded,
            }),
            Err(e) => {
                keyword.retire();
                Err(e)
            }
        }
    }

    /// Republish the current data with the ledger's processed set applied,
    /// so consolidated raw records leave the search universe.
    pub fn refresh_liveness(&self) -> Result<u64> {
        let _guard = self.lock_publish()?;
        let current = self.index.current()?;
        let liveness = self.liveness_from(&current.liveness, std::iter::empty())?;
        let generation = IndexGeneration::assemble(
            self.take_generation_number(),
            current.offsets.clone(),
            current.vectors.clone(),
            current.catalog.values().cloned(),
            Arc::clone(&current.keyword),
            liveness,
            Some((&current.graph, &current.catalog)),
        );
        Ok(self.index.publish(generation)?.number)
    }

    pub fn index_code(&self, root: &Path) -> Result<CodeIndexReport> {
        self.index_code_with_progress(root, |_| {}, |_| {})
    }

    /// Scan `root` and store its code units as a new indexing run. Units of
    /// earlier runs stop being findable once the run is published.
    ///
    /// `on_scanned` receives the unit count before embedding starts.
    #[tracing::instrument(skip_all, fields(root = %root.display()))]
    pub fn index_code_with_progress(
        &self,
        root: &Path,
        on_scanned: impl FnOnce(u64),
        progress: impl FnMut(u64),
    ) -> Result<CodeIndexReport> {
        let modules = scanner::scan_project(root)?;

        // The run number is taken under the publish lock and held through
        // the publish, so concurrent runs cannot share a number.
        let guard = self.lock_publish()?;
        let run = self
            .index
            .current()?
            .liveness
            .latest_code_run
            .map_or(1, |r| r + 1);
        let fragments = dedup_by_id(unit_fragments(&modules, run, Utc::now()));
        let units = fragments.len();
        on_scanned(units as u64);

        let embedded = self.embed_new(&fragments, progress)?;
        let report = self.commit_ingest(&guard, fragments, embedded)?;
        drop(guard);
        tracing::info!(run, modules = modules.len(), units, "code indexed");
        Ok(CodeIndexReport {
            run,
            modules: modules.len(),
            units,
            stored: report.stored,
            generation: report.generation,
        })
    }

    /// Log a raw interaction and make it searchable right away as a
    /// low-priority `raw_episodic` fragment.
    #[tracing::instrument(skip_all, fields(session = %session_id))]
    pub fn record_interaction(
        &self,
        session_id: &str,
        prompt: &str,
        response: &str,
        at: DateTime<Utc>,
    ) -> Result<RecordedInteraction> {
        anyhow::ensure!(!session_id.trim().is_empty(), "session id must not be empty");
        let record = SessionRecord::new(session_id, prompt, response, at);
        self.raw_log.append(&record)?;

        let turn = {
            let mut turns = self
                .turns
                .lock()
                .map_err(|e| anyhow!("session turn lock poisoned: {e}"))?;
            let turn = turns.entry(record.session_id.clone()).or_insert(0);
            *turn += 1;
            *turn
        };

        let tags = self.classifier.classify(&record.prompt).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "intent classification failed, using fallback tags");
            IntentTags::default()
        });

        let fragment = episodic_fragment(&record, tags, turn);
        let recorded = RecordedInteraction {
            record_id: record.record_id.clone(),
            session_id: record.session_id.clone(),
            turn,
            fragment_id: fragment.id.clone(),
            locator: fragment.locator.clone(),
            tags,
        };
        self.ingest(vec![fragment])?;
        Ok(recorded)
    }

    /// Store a corrective directive derived from a past mistake. Corrections
    /// are permanent and outrank everything but rules on equal scores.
    #[tracing::instrument(skip_all)]
    pub fn record_correction(
        &self,
        mistake: &str,
        correction: &str,
        at: DateTime<Utc>,
    ) -> Result<RecordedCorrection> {
        anyhow::ensure!(!mistake.trim().is_empty(), "mistake must not be empty");
        anyhow::ensure!(!correction.trim().is_empty(), "correction must not be empty");

        let fragment = correction_fragment(mistake, correction, at);
        let (fragment_id, locator) = (fragment.id.clone(), fragment.locator.clone());
        let report = self.ingest(vec![fragment])?;
        tracing::info!(id = %fragment_id, "correction recorded");
        Ok(RecordedCorrection {
            fragment_id,
            locator,
            generation: report.generation,
            deduplicated: report.deduplicated > 0,
        })
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let generation = self.index.current()?;
        let recorded = self
            .turns
            .lock()
            .map_err(|e| anyhow!("session turn lock poisoned: {e}"))?
            .values()
            .sum();
        let ledger = self.lock_ledger()?;
        let mut sessions = BTreeMap::new();
        for (_, entry) in ledger.sessions() {
            *sessions.entry(entry.state.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(EngineStatus {
            index: IndexStatus::from(generation.as_ref()),
            consolidation: ConsolidationStatus {
                recorded,
                processed: ledger.processed().len(),
                sessions,
            },
        })
    }

    pub(crate) fn ledger_snapshot(&self) -> Result<Ledger> {
        Ok(self.lock_ledger()?.clone())
    }

    /// Apply `change` to the ledger and persist it. The in-memory ledger is
    /// only updated once the file write succeeded.
    pub(crate) fn update_ledger(&self, change: impl FnOnce(&mut Ledger)) -> Result<()> {
        let mut ledger = self.lock_ledger()?;
        let mut next = ledger.clone();
        change(&mut next);
        next.save(&self.dir.join(LEDGER_FILE))?;
        *ledger = next;
        Ok(())
    }

    /// Guard held for the duration of one sweep; `None` if another sweep runs.
    pub(crate) fn try_begin_sweep(&self) -> Result<Option<MutexGuard<'_, ()>>> {
        match self.sweep_lock.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(e)) => Err(anyhow!("sweep lock poisoned: {e}")),
        }
    }

    pub(crate) fn session_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        Ok(self.lock_ledger()?.session(session_id).map(|e| e.state))
    }
}

fn dedup_by_id(fragments: Vec<Fragment>) -> Vec<Fragment> {
    let mut unique = HashSet::new();
    fragments
        .into_iter()
        .filter(|f| unique.insert(f.id.clone()))
        .collect()
}

fn correction_fragment(mistake: &str, correction: &str, at: DateTime<Utc>) -> Fragment {
    let text = format!("Mistake: {}\nCorrection:\n{}", mistake.trim(), correction.trim());
    let locator = format!("correction_{}", at.format("%Y%m%d_%H%M%S"));
    Fragment::new(MemoryClass::ReflectiveCorrection, locator, text).created_at(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashing::HashingEmbeddingProvider;
    use crate::llm::FallbackClassifier;
    use crate::memory::types::MemoryClass;
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> Engine {
        let config = RecollectConfig::default().with_data_dir(tmp.path());
        Engine::open(
            config,
            Box::new(HashingEmbeddingProvider::new(64)),
            Box::new(FallbackClassifier),
        )
        .unwrap()
    }

    fn doc(locator: &str, text: &str) -> Fragment {
        Fragment::new(MemoryClass::Document, locator, text)
    }

    #[test]
    fn test_fresh_engine_publishes_empty_generation() {
        let tmp = TempDir::new().unwrap();
        let engine = open(&tmp);
        let status = engine.status().unwrap();
        assert_eq!(status.index.stored, 0);
        assert!(engine.index().is_loaded());
    }

    #[test]
    fn test_ingest_publishes_and_dedups() {
        let tmp = TempDir::new().unwrap();
        let engine = open(&tmp);
        let before = engine.index().current().unwrap().number;

        let report = engine
            .ingest(vec![doc("a.md", "alpha text"), doc("b.md", "beta text"), doc("a.md", "alpha text")])
            .unwrap();
        assert_eq!(report.stored, 2);
        assert!(report.generation > before);

        let again = engine.ingest(vec![doc("a.md", "alpha text")]).unwrap();
        assert_eq!(again.stored, 0);
        assert_eq!(again.deduplicated, 1);

        let generation = engine.index().current().unwrap();
        assert_eq!(generation.offsets.len(), 2);
        assert_eq!(generation.vectors.len(), 2);
        assert_eq!(generation.keyword.count().unwrap(), 2);
    }

    #[test]
    fn test_reopen_reuses_persisted_indexes() {
        let tmp = TempDir::new().unwrap();
        let number = {
            let engine = open(&tmp);
            engine.ingest(vec![doc("a.md", "alpha")]).unwrap();
            engine.rebuild().unwrap().generation
        };
        let engine = open(&tmp);
        let generation = engine.index().current().unwrap();
        assert_eq!(generation.number, number);
        assert_eq!(generation.catalog.len(), 1);
        assert_eq!(keyword::existing_files(tmp.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_rebuilds_when_vectors_are_missing() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(&tmp);
            engine.ingest(vec![doc("a.md", "alpha"), doc("b.md", "beta")]).unwrap();
        }
        std::fs::remove_file(tmp.path().join(VECTORS_FILE)).unwrap();

        let engine = open(&tmp);
        let generation = engine.index().current().unwrap();
        assert_eq!(generation.vectors.len(), 2);
        assert_eq!(generation.offsets.len(), 2);
        assert!(tmp.path().join(VECTORS_FILE).exists());
    }

    #[test]
    fn test_rebuild_replaces_keyword_file() {
        let tmp = TempDir::new().unwrap();
        let engine = open(&tmp);
        engine.ingest(vec![doc("a.md", "alpha")]).unwrap();
        let old = engine.index().current().unwrap().keyword.path().to_path_buf();

        engine.rebuild().unwrap();
        let generation = engine.index().current().unwrap();
        assert_ne!(generation.keyword.path(), old);
        assert!(!old.exists());
        assert_eq!(generation.keyword.count().unwrap(), 1);
    }

    #[test]
    fn test_expand_depth_is_capped() {
        let tmp = TempDir::new().unwrap();
        let engine = open(&tmp);
        assert_eq!(engine.clamp_depth(1), 1);
        assert_eq!(engine.clamp_depth(50), engine.config().retrieval.max_expand_depth);
    }

    #[test]
    fn test_record_interaction_numbers_turns() {
        let tmp = TempDir::new().unwrap();
        let engine = open(&tmp);
        let at = Utc::now();
        let first = engine.record_interaction("s1", "hello", "hi", at).unwrap();
        let second = engine.record_interaction("s1", "again", "yes", at).unwrap();
        let other = engine.record_interaction("s2", "hey", "ho", at).unwrap();
        assert_eq!((first.turn, second.turn, other.turn), (1, 2, 1));
        assert!(first.locator.starts_with("interaction_general_talk_other_"));

        drop(engine);
        let engine = open(&tmp);
        let third = engine.record_interaction("s1", "more", "ok", at).unwrap();
        assert_eq!(third.turn, 3);
        assert_eq!(engine.status().unwrap().consolidation.recorded, 4);
    }

    #[test]
    fn test_empty_session_id_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let engine = open(&tmp);
        assert!(engine.record_interaction(" ", "p", "r", Utc::now()).is_err());
    }
}
