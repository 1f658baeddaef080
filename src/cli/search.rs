use anyhow::Result;
use tokio_util::sync::CancellationToken;

use recollect::config::RecollectConfig;
use recollect::memory::types::MemoryClass;
use recollect::retrieval::orchestrator::SearchRequest;

/// Run a search from the terminal and print the ranked hits.
pub async fn search(
    config: &RecollectConfig,
    query: &str,
    classes: Vec<MemoryClass>,
    top_k: Option<usize>,
    expand: Option<usize>,
) -> Result<()> {
    let mut request = SearchRequest::new(query);
    request.top_k = top_k;
    if !classes.is_empty() {
        request.memory_classes = Some(classes);
    }

    let result = super::with_engine(config, move |engine| {
        Ok(engine.search_with_context(&request, expand, &CancellationToken::new())?)
    })
    .await?;

    let hits = &result.outcome.hits;
    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) in generation {}\n",
        hits.len(),
        result.outcome.generation
    );
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {}. [{}] {} (score: {:.3})",
            i + 1,
            hit.memory_class,
            hit.source_locator,
            hit.score,
        );
        println!("     {}", hit.preview);
        println!("     id: {}", hit.fragment_id);
        println!();
    }

    if let Some(expansion) = result.expansion.filter(|e| !e.skeleton.is_empty()) {
        println!("Code context ({} unit(s)):\n", expansion.units.len());
        println!("{}", expansion.skeleton);
    }

    Ok(())
}
