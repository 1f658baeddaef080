//! CLI `index-code` command: scan a project and index its code units.

use std::path::PathBuf;

use anyhow::{Context, Result};

use recollect::config::RecollectConfig;

pub async fn index_code(config: &RecollectConfig, root: PathBuf) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", root.display()))?;
    println!("Scanning {}...", root.display());

    let report = super::with_engine(config, move |engine| {
        let pb = super::progress_bar(0)?;
        let report = engine.index_code_with_progress(
            &root,
            |units| pb.set_length(units),
            |done| pb.set_position(done),
        );
        pb.finish_and_clear();
        report
    })
    .await?;

    println!(
        "Indexed run {}: {} module(s), {} unit(s), {} new fragment(s). Generation {}.",
        report.run, report.modules, report.units, report.stored, report.generation
    );
    Ok(())
}
