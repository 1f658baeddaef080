use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use recollect::config::RecollectConfig;
use recollect::consolidation;
use recollect::llm;

/// Run one consolidation sweep, as of `now` when given.
pub async fn consolidate(config: &RecollectConfig, now: Option<DateTime<Utc>>) -> Result<()> {
    let llm_config = config.llm.clone();
    let report = super::with_engine(config, move |engine| {
        let summarizer = llm::create_summarizer(&llm_config)?
            .context("consolidation needs a summarizer; set llm.provider = \"http\"")?;
        consolidation::sweep(engine, summarizer.as_ref(), now.unwrap_or_else(Utc::now))
    })
    .await?;

    if report.skipped {
        println!("Another sweep is running; nothing done.");
        return Ok(());
    }
    println!(
        "Examined {} session(s): {} consolidated, {} still active, {} failed ({} summaries written).",
        report.examined, report.consolidated, report.accumulating, report.failed, report.fragments_written
    );
    if report.failed > 0 {
        println!("Failed sessions stay pending and are retried on the next sweep.");
    }
    Ok(())
}
