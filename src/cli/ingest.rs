//! CLI `ingest` command: load rule, correction or document files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use recollect::config::RecollectConfig;
use recollect::memory::types::{Fragment, MemoryClass};

const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "rst"];

/// Store every text file under `path` as one fragment of `class`, located by
/// its path relative to `path`.
pub async fn ingest(config: &RecollectConfig, path: PathBuf, class: MemoryClass) -> Result<()> {
    anyhow::ensure!(
        matches!(
            class,
            MemoryClass::Rule | MemoryClass::ReflectiveCorrection | MemoryClass::Document
        ),
        "only rule, reflective_correction and document files can be ingested \
         (code goes through index-code, conversations through record)"
    );

    let fragments = read_fragments(&path, class)?;
    if fragments.is_empty() {
        println!("No text files found under {}.", path.display());
        return Ok(());
    }
    let total = fragments.len();
    println!("Ingesting {total} {class} file(s)...");

    let report = super::with_engine(config, move |engine| {
        let pb = super::progress_bar(total as u64)?;
        let report = engine.ingest_with_progress(fragments, |done| pb.set_position(done));
        pb.finish_and_clear();
        report
    })
    .await?;

    println!(
        "Stored {} new fragment(s), {} already present. Generation {}.",
        report.stored, report.deduplicated, report.generation
    );
    Ok(())
}

fn read_fragments(path: &Path, class: MemoryClass) -> Result<Vec<Fragment>> {
    let files: Vec<(String, PathBuf)> = if path.is_file() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        vec![(name, path.to_path_buf())]
    } else {
        WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| TEXT_EXTENSIONS.contains(&e))
            })
            .map(|entry| {
                let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
                (rel.to_string_lossy().replace('\\', "/"), entry.path().to_path_buf())
            })
            .collect()
    };

    let mut fragments = Vec::with_capacity(files.len());
    for (locator, file) in files {
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        if text.trim().is_empty() {
            continue;
        }
        fragments.push(Fragment::new(class, locator, text));
    }
    Ok(fragments)
}
