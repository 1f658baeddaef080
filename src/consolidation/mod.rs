//! Deferred consolidation of raw session records into durable summaries.
//!
//! Per session: `Accumulating` while records keep arriving, `AwaitingTimeout`
//! once the inactivity window has passed, `Summarizing` while the summarizer
//! runs and its blocks are ingested, `Indexed` once every block is durably
//! written. A session is only marked processed after the ingest published;
//! any failure leaves it `Summarizing` for the next sweep.

pub mod ledger;
pub mod rawlog;
pub mod scheduler;
pub mod transcript;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::llm::Summarizer;
use crate::memory::taxonomy::interaction_locator;
use crate::memory::types::{Fragment, MemoryClass, SessionMeta, SessionRecord};

use self::transcript::{build_transcript, instructions, parse_summary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Accumulating,
    AwaitingTimeout,
    Summarizing,
    Indexed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accumulating => "accumulating",
            Self::AwaitingTimeout => "awaiting_timeout",
            Self::Summarizing => "summarizing",
            Self::Indexed => "indexed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions with unprocessed records.
    pub examined: usize,
    /// Sessions still inside the inactivity window.
    pub accumulating: usize,
    pub consolidated: usize,
    pub failed: usize,
    pub fragments_written: usize,
    /// Another sweep held the sweep lock; nothing was done.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// One pass over the raw log as of `now`.
#[tracing::instrument(skip_all, fields(now = %now))]
pub fn sweep(engine: &Engine, summarizer: &dyn Summarizer, now: DateTime<Utc>) -> Result<SweepReport> {
    let Some(_sweeping) = engine.try_begin_sweep()? else {
        tracing::info!("consolidation sweep already running, skipping");
        return Ok(SweepReport {
            skipped: true,
            ..SweepReport::default()
        });
    };

    let window = Duration::hours(engine.config().consolidation.inactivity_timeout_hours as i64);
    let ledger = engine.ledger_snapshot()?;

    let mut sessions: BTreeMap<String, Vec<SessionRecord>> = BTreeMap::new();
    for record in engine.raw_log().read_all()? {
        if !ledger.is_processed(&record.record_id) {
            sessions.entry(record.session_id.clone()).or_default().push(record);
        }
    }

    let mut report = SweepReport::default();
    for (session_id, mut records) in sessions {
        report.examined += 1;
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });

        let newest = records.last().map(|r| r.timestamp).unwrap_or(now);
        if now - newest < window {
            report.accumulating += 1;
            if engine.session_state(&session_id)? != Some(SessionState::Accumulating) {
                engine.update_ledger(|l| l.set_state(&session_id, SessionState::Accumulating, now))?;
            }
            continue;
        }

        engine.update_ledger(|l| {
            l.set_state(&session_id, SessionState::AwaitingTimeout, now);
            l.set_state(&session_id, SessionState::Summarizing, now);
        })?;

        match consolidate_session(engine, summarizer, &session_id, &records) {
            Ok(written) => {
                engine.update_ledger(|l| {
                    l.mark_indexed(&session_id, records.iter().map(|r| r.record_id.as_str()), now)
                })?;
                report.consolidated += 1;
                report.fragments_written += written;
                tracing::info!(session = %session_id, messages = records.len(), written, "session consolidated");
            }
            Err(e) => {
                report.failed += 1;
                let message = format!("{e:#}");
                tracing::warn!(session = %session_id, error = %message, "session consolidation failed, will retry");
                engine.update_ledger(|l| l.record_failure(&session_id, &message, now))?;
            }
        }
    }

    if report.consolidated > 0 {
        engine.refresh_liveness()?;
    }

    tracing::info!(
        examined = report.examined,
        accumulating = report.accumulating,
        consolidated = report.consolidated,
        failed = report.failed,
        "consolidation sweep finished"
    );
    Ok(report)
}

/// Summarize one session and ingest a summary per record. Returns the
/// number of fragments newly written.
fn consolidate_session(
    engine: &Engine,
    summarizer: &dyn Summarizer,
    session_id: &str,
    records: &[SessionRecord],
) -> Result<usize> {
    let transcript = build_transcript(records);
    let response = summarizer
        .summarize(&transcript, &instructions(records.len()))
        .context("summarizer call failed")?;
    let blocks = parse_summary(&response, records.len())?;

    let fragments: Vec<Fragment> = records
        .iter()
        .zip(blocks)
        .enumerate()
        .map(|(i, (record, block))| {
            Fragment::new(
                MemoryClass::ConsolidatedSummary,
                interaction_locator(&block.tags, record.timestamp),
                block.summary,
            )
            .with_tags(block.tags)
            .with_session(SessionMeta {
                session_id: session_id.to_string(),
                record_id: record.record_id.clone(),
                turn: i + 1,
            })
            .created_at(record.timestamp)
        })
        .collect();

    let report = engine.ingest(fragments).context("failed to index session summaries")?;
    Ok(report.stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(SessionState::AwaitingTimeout.as_str(), "awaiting_timeout");
        assert_eq!(
            serde_json::to_string(&SessionState::Summarizing).unwrap(),
            "\"summarizing\""
        );
    }
}
