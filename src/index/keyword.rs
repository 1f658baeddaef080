//! Keyword index: SQLite FTS5 over fragment text, locator and intent tags.
//!
//! Each index generation built by a full rebuild gets its own database file
//! (`keyword-<n>.db`). Incremental ingests add rows to the current file;
//! readers intersect hits with their own generation's catalog, so rows added
//! after a reader pinned its generation are invisible to it. A retired file
//! is deleted when the last generation holding it is dropped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};

use crate::memory::types::{Fragment, FragmentId};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS indexed_ids (
    id TEXT PRIMARY KEY
);

CREATE VIRTUAL TABLE IF NOT EXISTS fragments_fts USING fts5(
    text,
    locator,
    subject,
    action,
    category,
    id UNINDEXED,
    tokenize = 'unicode61 remove_diacritics 2'
);
"#;

pub struct KeywordIndex {
    path: PathBuf,
    writer: Mutex<Connection>,
    retired: AtomicBool,
}

impl std::fmt::Debug for KeywordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordIndex")
            .field("path", &self.path)
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish()
    }
}

impl KeywordIndex {
    /// Open (or create) the keyword database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open keyword index at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize keyword index schema")?;

        tracing::debug!(path = %path.display(), "keyword index opened");
        Ok(Self {
            path,
            writer: Mutex::new(conn),
            retired: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index `fragments`, skipping ids already present. Returns how many were added.
    pub fn insert<'a>(&self, fragments: impl IntoIterator<Item = &'a Fragment>) -> Result<usize> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("keyword index writer lock poisoned"))?;
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut claim = tx.prepare_cached("INSERT OR IGNORE INTO indexed_ids (id) VALUES (?1)")?;
            let mut row = tx.prepare_cached(
                "INSERT INTO fragments_fts (text, locator, subject, action, category, id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for fragment in fragments {
                if claim.execute(params![fragment.id.as_str()])? == 0 {
                    continue;
                }
                let [subject, action, category] = fragment
                    .tags
                    .as_ref()
                    .map(|t| t.slugs())
                    .unwrap_or(["", "", ""]);
                row.execute(params![
                    fragment.text,
                    fragment.locator,
                    subject,
                    action,
                    category,
                    fragment.id.as_str(),
                ])?;
                added += 1;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Number of indexed fragments.
    pub fn count(&self) -> Result<usize> {
        let conn = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("keyword index writer lock poisoned"))?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM indexed_ids", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Ids of fragments matching any of `terms` (prefix match).
    ///
    /// Uses a dedicated read-only connection so searches never wait on the
    /// writer lock.
    pub fn search(&self, terms: &[String]) -> Result<HashSet<FragmentId>> {
        let expression = match_expression(terms);
        if expression.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open keyword index {}", self.path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))?;

        let mut stmt = conn.prepare("SELECT id FROM fragments_fts WHERE fragments_fts MATCH ?1")?;
        let ids = stmt
            .query_map(params![expression], |row| row.get::<_, String>(0))?
            .map(|r| r.map(FragmentId::from))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Mark the backing file for deletion once this index is dropped.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for KeywordIndex {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }
        remove_files(&self.path);
        tracing::debug!(path = %self.path.display(), "retired keyword index removed");
    }
}

/// `keyword-<generation>.db`.
pub fn file_name(generation: u64) -> String {
    format!("keyword-{generation}.db")
}

/// Keyword databases in `dir`, ordered by generation.
pub fn existing_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let generation = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("keyword-"))
            .and_then(|n| n.strip_suffix(".db"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(generation) = generation {
            found.push((generation, path));
        }
    }
    found.sort();
    Ok(found)
}

/// Delete a keyword database together with its WAL and shared-memory files.
pub fn remove_files(path: &Path) {
    let base = path.to_string_lossy().into_owned();
    for path in [base.clone(), format!("{base}-wal"), format!("{base}-shm")] {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path, error = %e, "failed to remove keyword index file");
            }
        }
    }
}

/// FTS5 MATCH expression: each term quoted, prefix-matched, OR'ed together.
///
/// Quoting keeps user input from being parsed as FTS5 operators; the prefix
/// star lets a lemmatized term (`script`) match its inflections (`scripts`).
pub fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}
