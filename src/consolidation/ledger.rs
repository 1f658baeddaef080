//! `consolidation.json`: which raw records are processed, and where each
//! session stands in the consolidation state machine.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionState;

pub const LEDGER_FILE: &str = "consolidation.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub state: SessionState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    processed: BTreeSet<String>,
    #[serde(default)]
    sessions: BTreeMap<String, SessionEntry>,
}

impl Ledger {
    /// Read the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Replace the file at `path` (tmp + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let json = serde_json::to_vec_pretty(self).context("failed to encode ledger")?;
            file.write_all(&json)?;
            file.sync_data()?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn is_processed(&self, record_id: &str) -> bool {
        self.processed.contains(record_id)
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    pub fn session(&self, session_id: &str) -> Option<&SessionEntry> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&String, &SessionEntry)> {
        self.sessions.iter()
    }

    pub fn set_state(&mut self, session_id: &str, state: SessionState, now: DateTime<Utc>) {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                state,
                attempts: 0,
                last_error: None,
                updated_at: now,
            });
        entry.state = state;
        entry.updated_at = now;
    }

    /// Keep the session in `Summarizing` and count the failed attempt.
    pub fn record_failure(&mut self, session_id: &str, error: &str, now: DateTime<Utc>) {
        self.set_state(session_id, SessionState::Summarizing, now);
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
    }

    /// Mark `record_ids` processed and the session `Indexed`.
    pub fn mark_indexed<'a>(
        &mut self,
        session_id: &str,
        record_ids: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) {
        self.processed
            .extend(record_ids.into_iter().map(str::to_string));
        self.set_state(session_id, SessionState::Indexed, now);
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.last_error = None;
        }
    }
}
