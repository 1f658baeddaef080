mod helpers;

use chrono::Utc;
use helpers::{fragment, open_engine};
use recollect::error::RetrievalError;
use recollect::memory::taxonomy::{Action, Category, IntentTags, Subject};
use recollect::memory::types::MemoryClass;
use recollect::retrieval::orchestrator::{SearchRequest, StageToggles};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn search(engine: &recollect::engine::Engine, request: &SearchRequest) -> recollect::retrieval::orchestrator::SearchOutcome {
    engine.search(request, &CancellationToken::new()).unwrap()
}

#[test]
fn sparse_but_well_named_fragment_surfaces_from_name_stage() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine
        .ingest(vec![
            fragment(
                MemoryClass::ConsolidatedSummary,
                "interaction_script_debug_agent_20241201.json",
                "ok",
            ),
            fragment(MemoryClass::Document, "agents.md", "agent design notes for the planner"),
            fragment(MemoryClass::Document, "shell.md", "a shell script that backs up the disk"),
        ])
        .unwrap();

    let outcome = search(&engine, &SearchRequest::new("debug agent script"));
    assert_eq!(outcome.stage_counts.names, Some(1));
    let top = &outcome.hits[0];
    assert_eq!(top.source_locator, "interaction_script_debug_agent_20241201.json");
    assert!((top.score - 1.0).abs() < 1e-9, "score was {}", top.score);
}

#[test]
fn long_fragment_covering_every_keyword_scores_one() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);

    let filler = ["quick", "brown", "fox", "jumps", "lazy", "dog", "river", "stone"];
    let mut words: Vec<&str> = (0..997).map(|i| filler[i % filler.len()]).collect();
    words.insert(100, "kafka");
    words.insert(500, "consumer");
    words.insert(900, "rebalance");
    assert_eq!(words.len(), 1000);

    engine
        .ingest(vec![
            fragment(MemoryClass::Document, "notes/streaming.md", &words.join(" ")),
            fragment(MemoryClass::Document, "notes/kafka.md", "kafka"),
        ])
        .unwrap();

    let outcome = search(&engine, &SearchRequest::new("kafka consumer rebalance"));
    let top = &outcome.hits[0];
    assert_eq!(top.source_locator, "notes/streaming.md");
    assert!((top.score - 1.0).abs() < 1e-9, "score was {}", top.score);
    assert!(outcome.hits[1].score < 1.0);
}

#[test]
fn class_filter_and_priority_ordering() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine
        .ingest(vec![
            fragment(MemoryClass::Rule, "rules/deploy.md", "never deploy on friday"),
            fragment(MemoryClass::Document, "docs/deploy.md", "never deploy on friday"),
        ])
        .unwrap();

    let outcome = search(&engine, &SearchRequest::new("deploy friday"));
    assert_eq!(outcome.hits.len(), 2);
    assert_eq!(outcome.hits[0].memory_class, MemoryClass::Rule);

    let only_docs = SearchRequest {
        memory_classes: Some(vec![MemoryClass::Document]),
        ..SearchRequest::new("deploy friday")
    };
    let outcome = search(&engine, &only_docs);
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].source_locator, "docs/deploy.md");
}

#[test]
fn recorded_correction_outranks_an_equally_scored_document() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine
        .ingest(vec![fragment(
            MemoryClass::Document,
            "docs/guide.md",
            "always quote shell paths",
        )])
        .unwrap();
    let at = Utc::now();
    let recorded = engine
        .record_correction(
            "a script broke on a directory with spaces",
            "always quote shell paths",
            at,
        )
        .unwrap();
    assert!(recorded.locator.starts_with("correction_"));

    let outcome = search(&engine, &SearchRequest::new("quote shell paths"));
    assert_eq!(outcome.hits.len(), 2);
    assert!((outcome.hits[0].score - outcome.hits[1].score).abs() < 1e-9);
    assert_eq!(outcome.hits[0].memory_class, MemoryClass::ReflectiveCorrection);
    assert_eq!(outcome.hits[0].fragment_id, recorded.fragment_id);
    assert_eq!(outcome.hits[1].memory_class, MemoryClass::Document);

    let again = engine
        .record_correction(
            "a script broke on a directory with spaces",
            "always quote shell paths",
            at,
        )
        .unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.fragment_id, recorded.fragment_id);
}

#[test]
fn caller_intent_breaks_ties_between_equal_matches() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let debug = IntentTags::new(Subject::Script, Action::Debug, Category::Test);
    let plan = IntentTags::new(Subject::Script, Action::Think, Category::Plan);
    engine
        .ingest(vec![
            fragment(MemoryClass::ConsolidatedSummary, "a", "retry loop in the uploader").with_tags(plan),
            fragment(MemoryClass::ConsolidatedSummary, "b", "retry loop in the uploader").with_tags(debug),
        ])
        .unwrap();

    let plain = search(&engine, &SearchRequest::new("uploader retry loop backoff"));
    assert_eq!(plain.hits.len(), 2);
    assert!((plain.hits[0].score - plain.hits[1].score).abs() < 1e-9);

    let request = SearchRequest {
        intent: Some(debug),
        stages: StageToggles::default().without(&["names".into()]).unwrap(),
        ..SearchRequest::new("uploader retry loop backoff")
    };
    let outcome = search(&engine, &request);
    assert_eq!(outcome.hits[0].source_locator, "b");
    assert!(outcome.hits[0].score > outcome.hits[1].score);
}

#[test]
fn raw_interactions_are_searchable_immediately() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let recorded = engine
        .record_interaction("s1", "how do I rotate the signing keys", "use the keyring tool", Utc::now())
        .unwrap();

    let request = SearchRequest {
        memory_classes: Some(vec![MemoryClass::RawEpisodic]),
        ..SearchRequest::new("rotate signing keys")
    };
    let outcome = search(&engine, &request);
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].fragment_id, recorded.fragment_id);
}

#[test]
fn nothing_relevant_is_an_empty_list() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine
        .ingest(vec![fragment(MemoryClass::Document, "a.md", "bread recipe")])
        .unwrap();

    let request = SearchRequest {
        stages: StageToggles::default().without(&["vectors".into()]).unwrap(),
        ..SearchRequest::new("quantum chromodynamics")
    };
    assert!(search(&engine, &request).hits.is_empty());
}

#[test]
fn cancelled_query_reports_cancellation() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    engine
        .ingest(vec![fragment(MemoryClass::Document, "a.md", "bread recipe")])
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.search(&SearchRequest::new("bread"), &cancel).unwrap_err();
    assert!(matches!(err, RetrievalError::Cancelled));
}

#[test]
fn top_k_limits_results() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let fragments = (0..8)
        .map(|i| fragment(MemoryClass::Document, &format!("doc{i}.md"), &format!("cache eviction note {i}")))
        .collect();
    engine.ingest(fragments).unwrap();

    let request = SearchRequest {
        top_k: Some(3),
        ..SearchRequest::new("cache eviction")
    };
    assert_eq!(search(&engine, &request).hits.len(), 3);
}
