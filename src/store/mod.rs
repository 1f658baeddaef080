//! Offset-indexed chunk store.
//!
//! Fragments are appended as JSON lines to `fragments.log`, the single
//! source of truth. Only the `(id → offset, length)` table and the vector
//! index stay resident; [`ChunkStore::read_entry`] is a positioned read
//! (seek + bounded `read_exact`), never a scan.
//!
//! Appends serialize through one writer mutex. Reads open their own file
//! handle and never touch that mutex for I/O, so a slow append does not
//! stall readers.

pub mod offsets;
pub mod vectors;

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::memory::types::{Fragment, FragmentId};
use offsets::{OffsetEntry, OffsetTable};
use vectors::VectorIndex;

pub const LOG_FILE: &str = "fragments.log";
pub const OFFSETS_FILE: &str = "offsets.idx";
pub const VECTORS_FILE: &str = "vectors.bin";

/// Missing vectors are embedded in batches of this size during a rebuild.
const REBUILD_EMBED_BATCH: usize = 32;

/// Result of a single append.
#[derive(Debug, Clone, Serialize)]
pub struct AppendOutcome {
    pub id: FragmentId,
    #[serde(skip)]
    pub entry: OffsetEntry,
    /// The id was already in the log; nothing was written.
    pub deduplicated: bool,
}

/// Output of [`ChunkStore::rebuild_index`].
pub struct RebuiltIndex {
    pub vectors: VectorIndex,
    pub offsets: OffsetTable,
    /// Vectors that had to be embedded because the cache lacked them.
    pub embedded: usize,
}

pub struct ChunkStore {
    dir: PathBuf,
    log_path: PathBuf,
    offsets_path: PathBuf,
    writer: Mutex<LogWriter>,
}

struct LogWriter {
    log: File,
    offsets_file: File,
    end: u64,
    offsets_end: u64,
    table: OffsetTable,
    /// Set when a failed append could not be rolled back; the files then
    /// hold bytes the table does not describe and further appends refuse.
    wedged: bool,
}

impl LogWriter {
    /// Cut both files back to the end of the last complete append.
    fn rollback(&mut self) -> Result<()> {
        truncate_to(&self.log, self.end).context("failed to truncate fragment log")?;
        truncate_to(&self.offsets_file, self.offsets_end)
            .context("failed to truncate offset table")?;
        Ok(())
    }

    fn write_pair(&mut self, line: &[u8], offsets_line: &[u8]) -> Result<()> {
        self.log
            .write_all(line)
            .context("failed to append to fragment log")?;
        self.offsets_file
            .write_all(offsets_line)
            .context("failed to append to offset table")?;
        Ok(())
    }
}

impl ChunkStore {
    /// Open (or create) the store in `dir`.
    ///
    /// A torn trailing log line is cut off. The offset table is trusted only
    /// if it covers the log exactly; otherwise it is rebuilt from a scan.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;

        let log_path = dir.join(LOG_FILE);
        let offsets_path = dir.join(OFFSETS_FILE);

        let log = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        let end = repair_torn_tail(&log, &log_path)?;

        let table = match OffsetTable::load(&offsets_path) {
            Ok(Some(table)) if offsets_cover_log(&table, end) => table,
            Ok(found) => {
                if found.is_some() {
                    tracing::warn!(path = %offsets_path.display(), "offset table does not match log, rescanning");
                }
                let table = scan_offsets(&log_path, end)?;
                table.write_atomic(&offsets_path)?;
                table
            }
            Err(e) => {
                tracing::warn!(error = %e, "offset table unreadable, rescanning");
                let table = scan_offsets(&log_path, end)?;
                table.write_atomic(&offsets_path)?;
                table
            }
        };

        let offsets_file = offsets::open_append(&offsets_path)?;
        let offsets_end = offsets_file
            .metadata()
            .with_context(|| format!("failed to stat {}", offsets_path.display()))?
            .len();
        tracing::info!(dir = %dir.display(), fragments = table.len(), bytes = end, "chunk store opened");

        Ok(Self {
            dir,
            log_path,
            offsets_path,
            writer: Mutex::new(LogWriter {
                log,
                offsets_file,
                end,
                offsets_end,
                table,
                wedged: false,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, LogWriter>> {
        self.writer
            .lock()
            .map_err(|e| anyhow::anyhow!("chunk store writer lock poisoned: {e}"))
    }

    /// Append a fragment. An id already present is not written again.
    #[tracing::instrument(skip_all, fields(id = %fragment.id))]
    pub fn append(&self, fragment: &Fragment) -> Result<AppendOutcome> {
        anyhow::ensure!(
            fragment.id == fragment.content_id(),
            "fragment id {} does not match its content",
            fragment.id
        );

        let mut line = serde_json::to_vec(fragment).context("failed to serialize fragment")?;
        let mut writer = self.lock_writer()?;
        anyhow::ensure!(
            !writer.wedged,
            "fragment log has unindexed bytes from a failed append; reopen the store"
        );

        if let Some(entry) = writer.table.get(&fragment.id) {
            return Ok(AppendOutcome {
                id: fragment.id.clone(),
                entry,
                deduplicated: true,
            });
        }

        let entry = OffsetEntry {
            offset: writer.end,
            length: line.len() as u64,
        };
        line.push(b'\n');
        let offsets_line = offsets::format_line(&fragment.id, &entry);

        // Both writes land or neither does.
        if let Err(e) = writer.write_pair(&line, offsets_line.as_bytes()) {
            if let Err(rollback) = writer.rollback() {
                tracing::error!(error = %rollback, "append rollback failed");
                writer.wedged = true;
            }
            return Err(e);
        }
        writer.end = entry.next_offset();
        writer.offsets_end += offsets_line.len() as u64;
        writer.table.insert(fragment.id.clone(), entry);

        Ok(AppendOutcome {
            id: fragment.id.clone(),
            entry,
            deduplicated: false,
        })
    }

    /// Flush appended bytes to stable storage.
    pub fn sync(&self) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.log.sync_data().context("failed to sync fragment log")?;
        writer
            .offsets_file
            .sync_data()
            .context("failed to sync offset table")?;
        Ok(())
    }

    /// Snapshot of the authoritative offset table.
    pub fn offsets(&self) -> Result<OffsetTable> {
        Ok(self.lock_writer()?.table.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock_writer()?.table.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Text of fragment `id`.
    pub fn read(&self, id: &FragmentId) -> Result<String> {
        Ok(self.read_fragment(id)?.text)
    }

    /// Full fragment record for `id`.
    pub fn read_fragment(&self, id: &FragmentId) -> Result<Fragment> {
        let entry = self
            .lock_writer()?
            .table
            .get(id)
            .with_context(|| format!("fragment not found: {id}"))?;
        Ok(self.read_entry(id, entry)?)
    }

    /// Positioned read of one log line, verified against `id`.
    pub fn read_entry(&self, id: &FragmentId, entry: OffsetEntry) -> Result<Fragment, RetrievalError> {
        let mut file = File::open(&self.log_path)
            .with_context(|| format!("failed to open {}", self.log_path.display()))?;
        let mut buf = vec![0u8; entry.length as usize];
        file.seek(SeekFrom::Start(entry.offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| RetrievalError::CorruptOffsetTable {
                id: id.to_string(),
                reason: format!("read of {} bytes at {} failed: {e}", entry.length, entry.offset),
            })?;

        let fragment: Fragment =
            serde_json::from_slice(&buf).map_err(|e| RetrievalError::CorruptOffsetTable {
                id: id.to_string(),
                reason: format!("bytes at {} are not a fragment record: {e}", entry.offset),
            })?;
        if &fragment.id != id {
            return Err(RetrievalError::CorruptOffsetTable {
                id: id.to_string(),
                reason: format!("offset {} holds fragment {}", entry.offset, fragment.id),
            });
        }
        Ok(fragment)
    }

    /// Rebuild the offset table and vector index from the log.
    ///
    /// Vectors found in `cached` are reused; the rest are embedded. `visit`
    /// sees every fragment once, in log order, so the caller can rebuild its
    /// own indexes in the same pass. A corrupt log line aborts the rebuild
    /// and leaves the store untouched.
    #[tracing::instrument(skip_all)]
    pub fn rebuild_index(
        &self,
        embedder: &dyn EmbeddingProvider,
        cached: Option<&VectorIndex>,
        mut visit: impl FnMut(&Fragment, OffsetEntry) -> Result<()>,
    ) -> Result<RebuiltIndex> {
        let end = self.lock_writer()?.end;

        let mut offsets = OffsetTable::default();
        let mut vectors = VectorIndex::new(embedder.dimensions());
        let mut pending: Vec<(FragmentId, String)> = Vec::new();
        let mut embedded = 0usize;

        for_each_record(&self.log_path, end, |fragment, entry| {
            visit(&fragment, entry)?;
            offsets.insert(fragment.id.clone(), entry);
            match cached.and_then(|c| c.get(&fragment.id)) {
                Some(v) if v.len() == vectors.dim() => {
                    vectors.insert(fragment.id.clone(), v.to_vec())?;
                }
                _ => {
                    pending.push((fragment.id.clone(), fragment.text));
                    if pending.len() >= REBUILD_EMBED_BATCH {
                        embedded += embed_pending(embedder, &mut pending, &mut vectors)?;
                    }
                }
            }
            Ok(())
        })?;
        embedded += embed_pending(embedder, &mut pending, &mut vectors)?;

        {
            let mut writer = self.lock_writer()?;
            // Entries appended after the scan started are kept as they are.
            for (id, entry) in writer.table.iter() {
                if entry.offset >= end {
                    offsets.insert(id.clone(), *entry);
                }
            }
            offsets.write_atomic(&self.offsets_path)?;
            writer.offsets_file = offsets::open_append(&self.offsets_path)?;
            writer.table = offsets.clone();
        }

        tracing::info!(
            fragments = offsets.len(),
            vectors = vectors.len(),
            embedded,
            "chunk store index rebuilt"
        );

        Ok(RebuiltIndex {
            vectors,
            offsets,
            embedded,
        })
    }

    /// Every fragment in log order, up to the current end of the log.
    pub fn scan(&self, mut visit: impl FnMut(Fragment, OffsetEntry) -> Result<()>) -> Result<()> {
        let end = self.lock_writer()?.end;
        for_each_record(&self.log_path, end, |fragment, entry| visit(fragment, entry))
    }
}

fn embed_pending(
    embedder: &dyn EmbeddingProvider,
    pending: &mut Vec<(FragmentId, String)>,
    vectors: &mut VectorIndex,
) -> Result<usize> {
    if pending.is_empty() {
        return Ok(0);
    }
    let texts: Vec<&str> = pending.iter().map(|(_, t)| t.as_str()).collect();
    let embedded = embedder
        .embed_batch(&texts)
        .context("embedding failed during index rebuild")?;
    anyhow::ensure!(
        embedded.len() == pending.len(),
        "embedder returned {} vectors for {} texts",
        embedded.len(),
        pending.len()
    );
    let count = pending.len();
    for ((id, _), vector) in pending.drain(..).zip(embedded) {
        vectors.insert(id, vector)?;
    }
    Ok(count)
}

/// Read the log up to `end`, decoding each line as a fragment.
fn for_each_record(
    log_path: &Path,
    end: u64,
    mut visit: impl FnMut(Fragment, OffsetEntry) -> Result<()>,
) -> Result<()> {
    let file = File::open(log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let mut reader = BufReader::new(file.take(end));
    let mut offset = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        anyhow::ensure!(
            line.last() == Some(&b'\n'),
            "corrupt log record at offset {offset}: missing line terminator"
        );
        let length = (read - 1) as u64;
        let fragment: Fragment = serde_json::from_slice(&line[..read - 1])
            .with_context(|| format!("corrupt log record at offset {offset}"))?;
        visit(fragment, OffsetEntry { offset, length })?;
        offset += read as u64;
    }
    Ok(())
}

fn scan_offsets(log_path: &Path, end: u64) -> Result<OffsetTable> {
    let mut table = OffsetTable::default();
    for_each_record(log_path, end, |fragment, entry| {
        table.insert(fragment.id, entry);
        Ok(())
    })?;
    Ok(table)
}

fn offsets_cover_log(table: &OffsetTable, end: u64) -> bool {
    table.covered_end() == end && table.iter().all(|(_, e)| e.next_offset() <= end)
}

/// Cut a trailing line that was never terminated (crash mid-append).
/// Returns the resulting log length.
fn repair_torn_tail(log: &File, log_path: &Path) -> Result<u64> {
    let len = log.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut reader = File::open(log_path)?;
    let mut last = [0u8; 1];
    reader.seek(SeekFrom::Start(len - 1))?;
    reader.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::new();
    File::open(log_path)?.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|p| p as u64 + 1)
        .unwrap_or(0);
    tracing::warn!(
        path = %log_path.display(),
        dropped = len - keep,
        "fragment log ends with a torn record, truncating"
    );
    log.set_len(keep)
        .context("failed to truncate torn fragment log")?;
    Ok(keep)
}

fn truncate_to(file: &File, len: u64) -> std::io::Result<()> {
    if file.metadata()?.len() != len {
        file.set_len(len)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashing::HashingEmbeddingProvider;
    use crate::memory::types::MemoryClass;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn doc(text: &str) -> Fragment {
        Fragment::new(MemoryClass::Document, "notes.md", text)
    }

    #[test]
    fn test_append_then_read() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path()).unwrap();
        let a = store.append(&doc("first fragment")).unwrap();
        let b = store.append(&doc("second\nwith newline")).unwrap();

        assert_eq!(store.read(&a.id).unwrap(), "first fragment");
        assert_eq!(store.read(&b.id).unwrap(), "second\nwith newline");
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_append_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path()).unwrap();
        let first = store.append(&doc("same")).unwrap();
        let second = store.append(&doc("same")).unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.entry, second.entry);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_tampered_id_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path()).unwrap();
        let mut fragment = doc("content");
        fragment.text = "changed after hashing".into();
        assert!(store.append(&fragment).is_err());
    }

    #[test]
    fn test_failed_offset_write_rolls_back_the_log() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path()).unwrap();
        let kept = store.append(&doc("kept")).unwrap();
        let log_len = std::fs::metadata(tmp.path().join(LOG_FILE)).unwrap().len();

        // A read-only handle makes the offset-table write fail after the
        // log line has already gone out.
        let read_only = File::open(tmp.path().join(OFFSETS_FILE)).unwrap();
        let healthy = std::mem::replace(&mut store.lock_writer().unwrap().offsets_file, read_only);
        let lost = doc("lost");
        assert!(store.append(&lost).is_err());
        assert_eq!(std::fs::metadata(tmp.path().join(LOG_FILE)).unwrap().len(), log_len);
        assert!(store.offsets().unwrap().get(&lost.id).is_none());

        store.lock_writer().unwrap().offsets_file = healthy;
        let next = store.append(&doc("next")).unwrap();
        assert_eq!(next.entry.offset, log_len);
        assert_eq!(store.read(&next.id).unwrap(), "next");
        assert_eq!(store.read(&kept.id).unwrap(), "kept");
        drop(store);

        let reopened = ChunkStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.read(&next.id).unwrap(), "next");
    }

    #[test]
    fn test_reopen_uses_offset_file() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let store = ChunkStore::open(tmp.path()).unwrap();
            let id = store.append(&doc("persisted")).unwrap().id;
            store.sync().unwrap();
            id
        };
        let store = ChunkStore::open(tmp.path()).unwrap();
        assert_eq!(store.read(&id).unwrap(), "persisted");
    }

    #[test]
    fn test_missing_offset_file_is_rebuilt_by_scan() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let store = ChunkStore::open(tmp.path()).unwrap();
            store.append(&doc("one")).unwrap();
            store.append(&doc("two")).unwrap().id
        };
        std::fs::remove_file(tmp.path().join(OFFSETS_FILE)).unwrap();

        let store = ChunkStore::open(tmp.path()).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.read(&id).unwrap(), "two");
        assert!(tmp.path().join(OFFSETS_FILE).exists());
    }

    #[test]
    fn test_stale_offset_file_is_rebuilt_by_scan() {
        let tmp = TempDir::new().unwrap();
        {
            let store = ChunkStore::open(tmp.path()).unwrap();
            store.append(&doc("one")).unwrap();
        }
        // Offset table claims a line past the end of the log.
        std::fs::write(tmp.path().join(OFFSETS_FILE), "bogus\t0\t9999\n").unwrap();

        let store = ChunkStore::open(tmp.path()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.offsets().unwrap().get(&"bogus".into()).is_none());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let store = ChunkStore::open(tmp.path()).unwrap();
            store.append(&doc("intact")).unwrap().id
        };
        let mut log = OpenOptions::new()
            .append(true)
            .open(tmp.path().join(LOG_FILE))
            .unwrap();
        log.write_all(b"{\"id\":\"half-writ").unwrap();
        drop(log);

        let store = ChunkStore::open(tmp.path()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.read(&id).unwrap(), "intact");
        let appended = store.append(&doc("after repair")).unwrap();
        assert_eq!(store.read(&appended.id).unwrap(), "after repair");
    }

    #[test]
    fn test_read_entry_detects_wrong_offset() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path()).unwrap();
        let a = store.append(&doc("alpha")).unwrap();
        let b = store.append(&doc("beta")).unwrap();

        let err = store.read_entry(&a.id, b.entry).unwrap_err();
        assert!(matches!(err, RetrievalError::CorruptOffsetTable { .. }));

        let shifted = OffsetEntry { offset: a.entry.offset + 1, length: a.entry.length };
        let err = store.read_entry(&a.id, shifted).unwrap_err();
        assert!(matches!(err, RetrievalError::CorruptOffsetTable { .. }));
    }

    #[test]
    fn test_rebuild_index_counts_match_and_reuse_cache() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path()).unwrap();
        for i in 0..40 {
            store.append(&doc(&format!("fragment number {i}"))).unwrap();
        }
        let embedder = HashingEmbeddingProvider::new(32);

        let mut visited = 0;
        let first = store
            .rebuild_index(&embedder, None, |_, _| {
                visited += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 40);
        assert_eq!(first.vectors.len(), first.offsets.len());
        assert_eq!(first.embedded, 40);

        store.append(&doc("one more")).unwrap();
        let second = store
            .rebuild_index(&embedder, Some(&first.vectors), |_, _| Ok(()))
            .unwrap();
        assert_eq!(second.vectors.len(), 41);
        assert_eq!(second.offsets.len(), 41);
        assert_eq!(second.embedded, 1);
    }

    #[test]
    fn test_open_fails_on_corrupt_record() {
        let tmp = TempDir::new().unwrap();
        {
            let store = ChunkStore::open(tmp.path()).unwrap();
            store.append(&doc("good")).unwrap();
        }
        let mut log = OpenOptions::new()
            .append(true)
            .open(tmp.path().join(LOG_FILE))
            .unwrap();
        log.write_all(b"not json at all\n").unwrap();
        drop(log);

        // Offset table no longer covers the log, so open rescans and fails.
        assert!(ChunkStore::open(tmp.path()).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_read_after_append_roundtrips(texts in prop::collection::vec("\\PC{0,64}", 1..12)) {
            let tmp = TempDir::new().unwrap();
            let store = ChunkStore::open(tmp.path()).unwrap();
            for text in &texts {
                let outcome = store.append(&doc(text)).unwrap();
                prop_assert_eq!(store.read(&outcome.id).unwrap(), text.clone());
            }
        }
    }
}
