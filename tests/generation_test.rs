mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use helpers::{fragment, open_engine, test_config, TestEmbedder, DIM};
use recollect::embedding::EmbeddingProvider;
use recollect::engine::Engine;
use recollect::llm::FallbackClassifier;
use recollect::memory::types::MemoryClass;
use recollect::retrieval::orchestrator::SearchRequest;
use recollect::store::{LOG_FILE, VECTORS_FILE};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn corpus(n: usize) -> Vec<recollect::memory::types::Fragment> {
    (0..n)
        .map(|i| {
            fragment(
                MemoryClass::Document,
                &format!("docs/page{i}.md"),
                &format!("page {i} explains the ingest pipeline and its retry budget"),
            )
        })
        .collect()
}

#[test]
fn rebuild_keeps_vectors_and_offsets_in_step() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine.ingest(corpus(20)).unwrap();
    engine
        .record_interaction("s1", "where is the retry budget set", "in pipeline.toml", chrono::Utc::now())
        .unwrap();

    let report = engine.rebuild().unwrap();
    assert_eq!(report.fragments, 21);

    let generation = engine.index().current().unwrap();
    assert_eq!(generation.number, report.generation);
    assert_eq!(generation.vectors.len(), generation.offsets.len());
    assert_eq!(generation.keyword.count().unwrap(), generation.offsets.len());

    let status = engine.status().unwrap();
    assert_eq!(status.index.stored, 21);
    assert_eq!(status.index.vectors, 21);
    assert_eq!(status.index.by_class.get("document"), Some(&20));
    assert_eq!(status.index.by_class.get("raw_episodic"), Some(&1));
}

#[test]
fn every_index_structure_is_rebuilt_from_the_log_alone() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = open_engine(&tmp);
        engine.ingest(corpus(5)).unwrap();
    }

    for entry in std::fs::read_dir(tmp.path()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name != LOG_FILE {
            std::fs::remove_file(&path).unwrap();
        }
    }

    let engine = open_engine(&tmp);
    let generation = engine.index().current().unwrap();
    assert_eq!(generation.offsets.len(), 5);
    assert_eq!(generation.vectors.len(), 5);
    assert_eq!(generation.keyword.count().unwrap(), 5);
    assert!(tmp.path().join(VECTORS_FILE).exists());

    let outcome = engine
        .search(&SearchRequest::new("retry budget"), &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.hits.len(), 5);
}

#[test]
fn searches_keep_working_while_generations_are_swapped() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(&tmp));
    engine.ingest(corpus(10)).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut searches = 0usize;
                let mut last_generation = 0u64;
                while !done.load(Ordering::Acquire) || searches == 0 {
                    let outcome = engine
                        .search(&SearchRequest::new("ingest pipeline"), &CancellationToken::new())
                        .unwrap();
                    assert!(outcome.generation >= last_generation);
                    assert!(!outcome.hits.is_empty());
                    last_generation = outcome.generation;
                    searches += 1;
                }
                searches
            })
        })
        .collect();

    for round in 0..3 {
        engine
            .ingest(vec![fragment(
                MemoryClass::Rule,
                &format!("rules/{round}.md"),
                "the ingest pipeline never drops a record",
            )])
            .unwrap();
        engine.rebuild().unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    let generation = engine.index().current().unwrap();
    assert_eq!(generation.offsets.len(), 13);
    assert_eq!(generation.vectors.len(), 13);
}

#[test]
fn a_held_generation_stays_readable_after_a_swap() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine.ingest(corpus(3)).unwrap();

    let old = engine.index().current().unwrap();
    engine.rebuild().unwrap();
    let new = engine.index().current().unwrap();
    assert!(new.number > old.number);

    // The superseded keyword file lives until its last reader lets go.
    assert!(old.keyword.path().exists());
    assert_eq!(old.keyword.count().unwrap(), 3);
    let old_path = old.keyword.path().to_path_buf();
    drop(old);
    assert!(!old_path.exists());
    assert!(new.keyword.path().exists());
}

/// Returns a vector of the wrong width for any text mentioning "boom".
struct MisbehavingEmbedder;

impl EmbeddingProvider for MisbehavingEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if text.contains("boom") {
            return Ok(vec![1.0, 0.0, 0.0]);
        }
        TestEmbedder.embed(text)
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

#[test]
fn a_failed_ingest_does_not_block_the_next_one() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(
        test_config(tmp.path()),
        Box::new(MisbehavingEmbedder),
        Box::new(FallbackClassifier),
    )
    .unwrap();
    engine.ingest(corpus(2)).unwrap();

    let bad = fragment(MemoryClass::Document, "bad.md", "boom goes the uploader");
    let err = engine.ingest(vec![bad.clone()]).unwrap_err();
    assert!(err.to_string().contains("dimensions"), "{err:#}");
    // The log line was written before the vector was rejected.
    assert!(engine.store().offsets().unwrap().contains(&bad.id));

    let report = engine
        .ingest(vec![fragment(MemoryClass::Document, "good.md", "the uploader retries twice")])
        .unwrap();
    assert_eq!(report.stored, 1);

    let generation = engine.index().current().unwrap();
    assert_eq!(generation.offsets.len(), 3);
    assert_eq!(generation.vectors.len(), 3);
    assert!(!generation.offsets.contains(&bad.id));

    let outcome = engine
        .search(&SearchRequest::new("uploader"), &CancellationToken::new())
        .unwrap();
    assert!(outcome.hits.iter().any(|h| h.source_locator == "good.md"));
    assert!(outcome.hits.iter().all(|h| h.source_locator != "bad.md"));
}
