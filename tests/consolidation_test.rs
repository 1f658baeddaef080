mod helpers;

use chrono::{DateTime, Duration, TimeZone, Utc};
use helpers::{answer, open_engine, open_engine_with, test_config, DominantIntentSummarizer, ScriptedSummarizer};
use recollect::consolidation::sweep;
use recollect::engine::Engine;
use recollect::memory::taxonomy::{Action, Category, Subject};
use recollect::memory::types::{Fragment, MemoryClass};
use recollect::retrieval::orchestrator::SearchRequest;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 1, 9, 0, 0).unwrap()
}

/// Live fragments of `class`, read back from the store, oldest turn first.
fn live(engine: &Engine, class: MemoryClass) -> Vec<Fragment> {
    let generation = engine.index().current().unwrap();
    let mut fragments: Vec<Fragment> = generation
        .catalog
        .values()
        .filter(|m| m.class == class)
        .map(|m| engine.store().read_fragment(&m.id).unwrap())
        .collect();
    fragments.sort_by_key(|f| (f.created_at, f.session.as_ref().map(|s| s.turn)));
    fragments
}

fn record_bug_session(engine: &Engine) {
    engine.record_interaction("s1", "hello", "hi, what can I do?", t0()).unwrap();
    engine
        .record_interaction(
            "s1",
            "fix this bug in script.py",
            "the loop was off by one, patched",
            t0() + Duration::minutes(1),
        )
        .unwrap();
}

#[test]
fn short_greeting_takes_the_session_topic() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    record_bug_session(&engine);

    let summarizer = DominantIntentSummarizer::new();
    let report = sweep(&engine, &summarizer, t0() + Duration::hours(5)).unwrap();
    assert_eq!(report.consolidated, 1);
    assert_eq!(report.fragments_written, 2);
    assert_eq!(summarizer.calls(), 1);

    let summaries = live(&engine, MemoryClass::ConsolidatedSummary);
    assert_eq!(summaries.len(), 2);
    let greeting = &summaries[0];
    assert_eq!(greeting.session.as_ref().unwrap().turn, 1);
    assert_eq!(greeting.created_at, t0());
    let tags = greeting.tags.unwrap();
    assert_eq!(tags.action, Action::Debug);
    assert_eq!(tags.subject, Subject::Script);
    assert_ne!(tags.category, Category::Greet);
    assert!(greeting.locator.starts_with("interaction_script_debug_test_20241201_090000"));
}

#[test]
fn consolidated_session_hides_raw_records_and_is_found_by_pattern() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    record_bug_session(&engine);
    assert_eq!(live(&engine, MemoryClass::RawEpisodic).len(), 2);

    sweep(&engine, &DominantIntentSummarizer::new(), t0() + Duration::hours(5)).unwrap();
    assert!(live(&engine, MemoryClass::RawEpisodic).is_empty());

    let outcome = engine
        .search(&SearchRequest::new("*_debug_test_*"), &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.stage_counts.names, Some(2));
    assert!(outcome
        .hits
        .iter()
        .all(|h| h.memory_class == MemoryClass::ConsolidatedSummary));
}

#[test]
fn active_session_is_left_accumulating() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    record_bug_session(&engine);

    let summarizer = DominantIntentSummarizer::new();
    let report = sweep(&engine, &summarizer, t0() + Duration::hours(1)).unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.accumulating, 1);
    assert_eq!(report.consolidated, 0);
    assert_eq!(summarizer.calls(), 0);

    let status = engine.status().unwrap();
    assert_eq!(status.consolidation.sessions.get("accumulating"), Some(&1));
    assert_eq!(live(&engine, MemoryClass::RawEpisodic).len(), 2);
}

#[test]
fn resweeping_an_indexed_session_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let now = t0() + Duration::hours(5);
    {
        let engine = open_engine(&tmp);
        record_bug_session(&engine);
        let summarizer = DominantIntentSummarizer::new();
        sweep(&engine, &summarizer, now).unwrap();

        let again = sweep(&engine, &summarizer, now + Duration::hours(1)).unwrap();
        assert_eq!(again.examined, 0);
        assert_eq!(again.fragments_written, 0);
        assert_eq!(summarizer.calls(), 1);
    }

    // The ledger survives a restart.
    let engine = open_engine(&tmp);
    let summarizer = DominantIntentSummarizer::new();
    let report = sweep(&engine, &summarizer, now + Duration::days(1)).unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(summarizer.calls(), 0);
    assert_eq!(live(&engine, MemoryClass::ConsolidatedSummary).len(), 2);

    let status = engine.status().unwrap();
    assert_eq!(status.consolidation.processed, 2);
    assert_eq!(status.consolidation.sessions.get("indexed"), Some(&1));
}

#[test]
fn truncated_answer_is_retried_on_next_sweep() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    record_bug_session(&engine);

    let full = answer(&[
        ("script", "debug", "test", "greeting before the bug report"),
        ("script", "debug", "test", "off-by-one fixed in script.py"),
    ]);
    let truncated = full.replace(recollect::llm::END_OF_SESSION, "");
    let summarizer = ScriptedSummarizer::new(vec![Ok(truncated), Ok(full)]);

    let first = sweep(&engine, &summarizer, t0() + Duration::hours(5)).unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.consolidated, 0);
    assert!(live(&engine, MemoryClass::ConsolidatedSummary).is_empty());
    assert_eq!(live(&engine, MemoryClass::RawEpisodic).len(), 2);
    let status = engine.status().unwrap();
    assert_eq!(status.consolidation.sessions.get("summarizing"), Some(&1));
    assert_eq!(status.consolidation.processed, 0);

    let second = sweep(&engine, &summarizer, t0() + Duration::hours(6)).unwrap();
    assert_eq!(second.consolidated, 1);
    assert_eq!(summarizer.calls(), 2);
    assert_eq!(live(&engine, MemoryClass::ConsolidatedSummary).len(), 2);
    assert!(live(&engine, MemoryClass::RawEpisodic).is_empty());
}

#[test]
fn unreachable_summarizer_keeps_session_pending() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    record_bug_session(&engine);

    let summarizer = ScriptedSummarizer::new(vec![Err("connection refused".into())]);
    let report = sweep(&engine, &summarizer, t0() + Duration::hours(5)).unwrap();
    assert_eq!(report.failed, 1);

    let report = sweep(&engine, &summarizer, t0() + Duration::hours(6)).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(summarizer.calls(), 2);
    assert_eq!(engine.status().unwrap().consolidation.processed, 0);
}

#[test]
fn sessions_are_consolidated_independently() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.consolidation.inactivity_timeout_hours = 2;
    let engine = open_engine_with(config);

    engine.record_interaction("old", "install the toolchain", "done", t0()).unwrap();
    engine
        .record_interaction("new", "hello", "hi", t0() + Duration::hours(3))
        .unwrap();

    let report = sweep(&engine, &DominantIntentSummarizer::new(), t0() + Duration::hours(4)).unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.consolidated, 1);
    assert_eq!(report.accumulating, 1);

    let summaries = live(&engine, MemoryClass::ConsolidatedSummary);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].session.as_ref().unwrap().session_id, "old");
    assert_eq!(summaries[0].tags.unwrap().subject, Subject::Setup);
    assert_eq!(live(&engine, MemoryClass::RawEpisodic).len(), 1);
}
