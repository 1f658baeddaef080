//! Resident vector index and its on-disk form, `vectors.bin`.
//!
//! Layout: magic `RCVX`, u32 version, u32 dim, then records of
//! `u16 id length | id bytes | dim × f32`, all little-endian. Appends extend
//! the file; rebuilds replace it atomically. A torn trailing record (crash
//! mid-append) is dropped on load.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::memory::types::FragmentId;

const MAGIC: &[u8; 4] = b"RCVX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dim: usize,
    vectors: HashMap<FragmentId, Arc<[f32]>>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: HashMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, id: &FragmentId) -> Option<&[f32]> {
        self.vectors.get(id).map(|v| &v[..])
    }

    pub fn contains(&self, id: &FragmentId) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn insert(&mut self, id: FragmentId, vector: Vec<f32>) -> Result<()> {
        anyhow::ensure!(
            vector.len() == self.dim,
            "vector for {id} has {} dimensions, index expects {}",
            vector.len(),
            self.dim
        );
        self.vectors.insert(id, Arc::from(vector));
        Ok(())
    }

    /// Keep only ids accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&FragmentId) -> bool) {
        self.vectors.retain(|id, _| keep(id));
    }

    /// Load `vectors.bin`. `Ok(None)` when the file does not exist or was
    /// written with a different dimension (the cache is then useless).
    pub fn load(path: &Path, dim: usize) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .with_context(|| format!("failed to read {}", path.display()))?;

        anyhow::ensure!(
            bytes.len() >= HEADER_LEN && &bytes[..4] == MAGIC,
            "{} is not a vector index file",
            path.display()
        );
        let version = read_u32(&bytes[4..8]);
        anyhow::ensure!(version == VERSION, "unsupported vector index version {version}");
        let file_dim = read_u32(&bytes[8..12]) as usize;
        if file_dim != dim {
            tracing::warn!(file_dim, dim, "vector index dimension changed, discarding cache");
            return Ok(None);
        }

        let mut index = Self::new(dim);
        let mut pos = HEADER_LEN;
        while pos < bytes.len() {
            let Some(record) = decode_record(&bytes[pos..], dim) else {
                tracing::warn!(
                    offset = pos,
                    "torn record at end of vector index, dropping it"
                );
                break;
            };
            let (id, vector, consumed) = record?;
            index.vectors.insert(id, Arc::from(vector));
            pos += consumed;
        }
        Ok(Some(index))
    }

    /// Replace the file at `path` with this index (tmp + rename).
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("bin.tmp");
        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let mut out = BufWriter::new(file);
            write_header(&mut out, self.dim)?;
            let mut ordered: Vec<_> = self.vectors.iter().collect();
            ordered.sort_by(|a, b| a.0.cmp(b.0));
            for (id, vector) in ordered {
                write_record(&mut out, id, vector)?;
            }
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_data()?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Append records to `vectors.bin`, writing the header first if the file is new.
pub fn append_records<'a>(
    path: &Path,
    dim: usize,
    records: impl IntoIterator<Item = (&'a FragmentId, &'a [f32])>,
) -> Result<()> {
    let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    let mut out = BufWriter::new(file);
    if is_new {
        write_header(&mut out, dim)?;
    }
    for (id, vector) in records {
        anyhow::ensure!(vector.len() == dim, "vector for {id} has wrong dimension");
        write_record(&mut out, id, vector)?;
    }
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;
    Ok(())
}

fn write_header(out: &mut impl Write, dim: usize) -> Result<()> {
    out.write_all(MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(&(dim as u32).to_le_bytes())?;
    Ok(())
}

fn write_record(out: &mut impl Write, id: &FragmentId, vector: &[f32]) -> Result<()> {
    let id_bytes = id.as_str().as_bytes();
    let id_len = u16::try_from(id_bytes.len()).context("fragment id too long")?;
    out.write_all(&id_len.to_le_bytes())?;
    out.write_all(id_bytes)?;
    for x in vector {
        out.write_all(&x.to_le_bytes())?;
    }
    Ok(())
}

/// `None` when `bytes` ends before the record does.
fn decode_record(bytes: &[u8], dim: usize) -> Option<Result<(FragmentId, Vec<f32>, usize)>> {
    if bytes.len() < 2 {
        return None;
    }
    let id_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let total = 2 + id_len + dim * 4;
    if bytes.len() < total {
        return None;
    }
    let id = match std::str::from_utf8(&bytes[2..2 + id_len]) {
        Ok(id) => FragmentId::from(id),
        Err(e) => return Some(Err(anyhow::anyhow!("vector index id is not UTF-8: {e}"))),
    };
    let vector = bytes[2 + id_len..total]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Ok((id, vector, total)))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
