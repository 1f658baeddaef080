mod cli;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recollect::config::RecollectConfig;
use recollect::memory::types::MemoryClass;
use recollect::server;

#[derive(Parser)]
#[command(name = "recollect", version, about = "Memory retrieval MCP server for AI agents")]
struct Cli {
    /// Config file (default: ~/.recollect/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio unless --http or server.transport = "http")
    Serve {
        /// Serve streamable HTTP on server.host:server.port
        #[arg(long)]
        http: bool,
    },
    /// Search memory from the terminal
    Search {
        query: String,
        /// Restrict to a memory class (repeatable)
        #[arg(long = "class")]
        classes: Vec<MemoryClass>,
        #[arg(long)]
        top_k: Option<usize>,
        /// Expand code hits this many hops along the dependency graph
        #[arg(long)]
        expand: Option<usize>,
    },
    /// Record one user/assistant exchange
    Record {
        #[arg(long)]
        session: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        response: String,
    },
    /// Consolidate inactive sessions into summaries
    Consolidate {
        /// Treat this RFC 3339 instant as "now"
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Ingest rule, reflective_correction or document files
    Ingest {
        path: PathBuf,
        #[arg(long, default_value = "document")]
        class: MemoryClass,
    },
    /// Scan a project and index its code units
    IndexCode { path: PathBuf },
    /// Rebuild every index structure from the log
    Rebuild,
    /// Show index and consolidation counters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RecollectConfig::load_from(path)?,
        None => RecollectConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http || config.server.transport == "http" {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Search {
            query,
            classes,
            top_k,
            expand,
        } => cli::search::search(&config, &query, classes, top_k, expand).await?,
        Command::Record {
            session,
            prompt,
            response,
        } => cli::record::record(&config, &session, &prompt, &response).await?,
        Command::Consolidate { now } => cli::consolidate::consolidate(&config, now).await?,
        Command::Ingest { path, class } => cli::ingest::ingest(&config, path, class).await?,
        Command::IndexCode { path } => cli::index_code::index_code(&config, path).await?,
        Command::Rebuild => cli::rebuild::rebuild(&config).await?,
        Command::Status => cli::status::status(&config).await?,
    }

    Ok(())
}
