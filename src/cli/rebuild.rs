//! CLI `rebuild` command: regenerate every index structure from the log.

use anyhow::Result;

use recollect::config::RecollectConfig;

pub async fn rebuild(config: &RecollectConfig) -> Result<()> {
    let report = super::with_engine(config, |engine| {
        let total = engine.store().len()? as u64;
        println!("Rebuilding index over {total} fragment(s)...");

        let pb = super::progress_bar(total)?;
        let report = engine.rebuild_with_progress(|done| pb.set_position(done));
        pb.finish_and_clear();
        report
    })
    .await?;

    println!(
        "Rebuilt generation {}: {} fragment(s), {} re-embedded.",
        report.generation, report.fragments, report.embedded
    );
    Ok(())
}
