use anyhow::Result;

use recollect::config::RecollectConfig;

/// Print index and consolidation counters.
pub async fn status(config: &RecollectConfig) -> Result<()> {
    let dir = config.resolved_data_dir();
    let status = super::with_engine(config, |engine| engine.status()).await?;
    let index = &status.index;

    println!("recollect status\n");
    println!("  Data dir:     {}", dir.display());
    println!("  Generation:   {} (built {})", index.generation, index.built_at.to_rfc3339());
    println!("  Keyword file: {}", index.keyword_file);
    println!("  Stored:       {}", index.stored);
    println!("  Findable:     {}", index.findable);
    println!("  Vectors:      {}", index.vectors);
    println!("  Graph:        {} node(s), {} edge(s)", index.graph_nodes, index.graph_edges);

    println!("\nFindable by class:");
    if index.by_class.is_empty() {
        println!("  (none)");
    }
    for (class, count) in &index.by_class {
        println!("  {class:<22} {count}");
    }

    let consolidation = &status.consolidation;
    println!("\nConsolidation:");
    println!("  Recorded:  {}", consolidation.recorded);
    println!("  Processed: {}", consolidation.processed);
    for (state, count) in &consolidation.sessions {
        println!("  {state:<18} {count} session(s)");
    }
    Ok(())
}
