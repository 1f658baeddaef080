//! Background sweep loop for the MCP server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ConsolidationConfig;
use crate::engine::Engine;
use crate::llm::Summarizer;

/// Run [`sweep`](super::sweep) every `sweep_interval_secs` until `cancel`
/// fires. The first sweep runs immediately. Sweeps run on the blocking pool
/// and a failed sweep is logged, not fatal.
pub fn spawn(
    engine: Arc<Engine>,
    summarizer: Arc<dyn Summarizer>,
    config: &ConsolidationConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = Duration::from_secs(config.sweep_interval_secs.max(1));
    tracing::info!(interval_secs = period.as_secs(), "consolidation scheduler started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let engine = Arc::clone(&engine);
            let summarizer = Arc::clone(&summarizer);
            let result = tokio::task::spawn_blocking(move || {
                super::sweep(&engine, summarizer.as_ref(), Utc::now())
            })
            .await;

            match result {
                Ok(Ok(report)) if report.consolidated + report.failed > 0 => {
                    tracing::debug!(?report, "scheduled sweep done");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "scheduled consolidation sweep failed"),
                Err(e) => tracing::error!(error = %e, "consolidation sweep task panicked"),
            }
        }

        tracing::info!("consolidation scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecollectConfig;
    use crate::embedding::hashing::HashingEmbeddingProvider;
    use crate::llm::FallbackClassifier;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Counting(Arc<AtomicUsize>);

    impl Summarizer for Counting {
        fn summarize(&self, _transcript: &str, _instructions: &str) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("offline")
        }
    }

    #[tokio::test]
    async fn test_scheduler_sweeps_and_stops_on_cancel() {
        let tmp = TempDir::new().unwrap();
        let mut config = RecollectConfig::default().with_data_dir(tmp.path());
        config.consolidation.inactivity_timeout_hours = 0;
        let engine = Arc::new(
            Engine::open(
                config.clone(),
                Box::new(HashingEmbeddingProvider::new(32)),
                Box::new(FallbackClassifier),
            )
            .unwrap(),
        );
        engine
            .record_interaction("s1", "hello", "hi", Utc::now() - chrono::Duration::minutes(5))
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn(
            Arc::clone(&engine),
            Arc::new(Counting(Arc::clone(&calls))),
            &config.consolidation,
            cancel.clone(),
        );

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 1);
        let state = engine.session_state("s1").unwrap();
        assert_eq!(state, Some(crate::consolidation::SessionState::Summarizing));
    }
}
