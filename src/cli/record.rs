use anyhow::Result;
use chrono::Utc;

use recollect::config::RecollectConfig;

/// Append one exchange to the raw interaction log.
pub async fn record(config: &RecollectConfig, session: &str, prompt: &str, response: &str) -> Result<()> {
    let (session, prompt, response) = (session.to_string(), prompt.to_string(), response.to_string());
    let recorded = super::with_engine(config, move |engine| {
        engine.record_interaction(&session, &prompt, &response, Utc::now())
    })
    .await?;

    println!(
        "Recorded turn {} of session {} as {}",
        recorded.turn, recorded.session_id, recorded.locator
    );
    println!("  record:   {}", recorded.record_id);
    println!("  fragment: {}", recorded.fragment_id);
    Ok(())
}
