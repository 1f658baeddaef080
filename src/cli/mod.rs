pub mod consolidate;
pub mod index_code;
pub mod ingest;
pub mod rebuild;
pub mod record;
pub mod search;
pub mod status;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use recollect::config::RecollectConfig;
use recollect::engine::Engine;

/// Open the engine and run `work` on the blocking pool. The engine is
/// dropped there too, since its HTTP clients are blocking.
pub async fn with_engine<T, F>(config: &RecollectConfig, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T> + Send + 'static,
{
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let engine = Engine::from_config(config).context("failed to open engine")?;
        work(&engine)
    })
    .await
    .context("engine task failed")?
}

/// A progress bar in the same style for every long-running command.
fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}
