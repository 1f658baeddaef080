//! `interactions.log`: the append-only JSONL audit trail of raw session records.
//!
//! Records are never rewritten or deleted; consolidation only reads them.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

use crate::memory::taxonomy::{interaction_locator, IntentTags};
use crate::memory::types::{Fragment, MemoryClass, SessionMeta, SessionRecord};

pub const INTERACTIONS_FILE: &str = "interactions.log";

#[derive(Debug)]
pub struct RawLog {
    path: PathBuf,
    writer: Mutex<File>,
}

impl RawLog {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(INTERACTIONS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    pub fn append(&self, record: &SessionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("failed to encode session record")?;
        line.push('\n');

        let mut file = self
            .writer
            .lock()
            .map_err(|e| anyhow!("interaction log lock poisoned: {e}"))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.sync_data()?;
        Ok(())
    }

    /// Every readable record, in log order. A line that does not decode (a
    /// torn write after a crash) is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<SessionRecord>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("failed to read interaction log")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping unreadable interaction record"),
            }
        }
        Ok(records)
    }
}

/// The searchable `raw_episodic` form of a record, named after its intent.
pub fn episodic_fragment(record: &SessionRecord, tags: IntentTags, turn: usize) -> Fragment {
    Fragment::new(
        MemoryClass::RawEpisodic,
        interaction_locator(&tags, record.timestamp),
        format!("user: {}\nassistant: {}", record.prompt, record.response),
    )
    .with_tags(tags)
    .with_session(SessionMeta {
        session_id: record.session_id.clone(),
        record_id: record.record_id.clone(),
        turn,
    })
    .created_at(record.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_append_then_read_back_in_order() {
        let tmp = TempDir::new().unwrap();
        let log = RawLog::open(tmp.path()).unwrap();
        let a = SessionRecord::new("s1", "hello", "hi", Utc::now());
        let b = SessionRecord::new("s1", "fix this", "done", Utc::now());
        log.append(&a).unwrap();
        log.append(&b).unwrap();

        let reopened = RawLog::open(tmp.path()).unwrap();
        assert_eq!(reopened.read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_episodic_fragment_is_named_and_linked() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 12, 1, 10, 0, 0).unwrap();
        let record = SessionRecord::new("s9", "hello", "hi", at);
        let fragment = episodic_fragment(&record, IntentTags::default(), 1);

        assert_eq!(fragment.class, MemoryClass::RawEpisodic);
        assert_eq!(fragment.locator, "interaction_general_talk_other_20241201_100000");
        assert_eq!(fragment.text, "user: hello\nassistant: hi");
        assert_eq!(fragment.created_at, at);
        let session = fragment.session.unwrap();
        assert_eq!(session.record_id, record.record_id);
        assert_eq!(session.turn, 1);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let log = RawLog::open(tmp.path()).unwrap();
        let a = SessionRecord::new("s1", "hello", "hi", Utc::now());
        log.append(&a).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"{\"record_id\": \"trunc")
            .unwrap();

        assert_eq!(log.read_all().unwrap(), vec![a]);
    }
}
