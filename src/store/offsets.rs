//! The `(id → offset, length)` table and its on-disk form, `offsets.idx`.
//!
//! One line per fragment: `id\toffset\tlength`. Appends extend the file;
//! rebuilds replace it atomically (tmp + rename).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::memory::types::FragmentId;

/// Byte range of one log line, newline excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    pub offset: u64,
    pub length: u64,
}

impl OffsetEntry {
    /// First byte after the line's trailing newline.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.length + 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    entries: HashMap<FragmentId, OffsetEntry>,
}

impl OffsetTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &FragmentId) -> Option<OffsetEntry> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &FragmentId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, id: FragmentId, entry: OffsetEntry) {
        self.entries.insert(id, entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FragmentId, &OffsetEntry)> {
        self.entries.iter()
    }

    /// End of the furthest line this table knows about (0 when empty).
    pub fn covered_end(&self) -> u64 {
        self.entries
            .values()
            .map(OffsetEntry::next_offset)
            .max()
            .unwrap_or(0)
    }

    /// Read `offsets.idx`. Returns `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)
            .with_context(|| format!("failed to open offset table {}", path.display()))?;

        let mut table = Self::default();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("failed to read offset table")?;
            if line.is_empty() {
                continue;
            }
            let (id, entry) = parse_line(&line)
                .with_context(|| format!("malformed offset table line {}: {line:?}", n + 1))?;
            table.insert(id, entry);
        }
        Ok(Some(table))
    }

    /// Replace the file at `path` with this table (tmp + rename).
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("idx.tmp");
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let mut ordered: Vec<_> = self.entries.iter().collect();
            ordered.sort_by_key(|(_, e)| e.offset);
            let mut buf = String::with_capacity(ordered.len() * 48);
            for (id, entry) in ordered {
                buf.push_str(&format_line(id, entry));
            }
            file.write_all(buf.as_bytes())?;
            file.sync_data()?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Open `offsets.idx` for appending, creating it if needed.
pub fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))
}

pub fn format_line(id: &FragmentId, entry: &OffsetEntry) -> String {
    format!("{}\t{}\t{}\n", id, entry.offset, entry.length)
}

fn parse_line(line: &str) -> Result<(FragmentId, OffsetEntry)> {
    let mut parts = line.split('\t');
    let (Some(id), Some(offset), Some(length), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("expected 3 tab-separated fields");
    };
    anyhow::ensure!(!id.is_empty(), "empty fragment id");
    Ok((
        FragmentId::from(id),
        OffsetEntry {
            offset: offset.parse().context("bad offset")?,
            length: length.parse().context("bad length")?,
        },
    ))
}
