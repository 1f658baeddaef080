//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! [`serve_stdio`] and [`serve_http`] open the engine, start the
//! consolidation scheduler when it is enabled, and hand the tool router to
//! rmcp.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;

use crate::config::RecollectConfig;
use crate::consolidation::scheduler;
use crate::engine::Engine;
use crate::llm::{self, Summarizer};
use crate::tools::RecollectTools;

/// Everything a transport needs: the engine, the summarizer, and the
/// running scheduler (if any).
struct Shared {
    engine: Arc<Engine>,
    summarizer: Option<Arc<dyn Summarizer>>,
    scheduler: Option<(CancellationToken, tokio::task::JoinHandle<()>)>,
}

impl Shared {
    async fn open(config: RecollectConfig) -> Result<Self> {
        // Blocking HTTP clients must be built off the async runtime.
        let (engine, summarizer) = tokio::task::spawn_blocking(move || -> Result<_> {
            let summarizer = llm::create_summarizer(&config.llm)
                .context("failed to create summarizer")?
                .map(Arc::<dyn Summarizer>::from);
            let engine = Engine::from_config(config)?;
            Ok((Arc::new(engine), summarizer))
        })
        .await
        .context("engine setup task failed")??;

        let status = engine.status()?;
        tracing::info!(
            dir = %engine.dir().display(),
            generation = status.index.generation,
            findable = status.index.findable,
            "engine ready"
        );

        let scheduler = match (&summarizer, engine.config().consolidation.enabled) {
            (Some(summarizer), true) => {
                let cancel = CancellationToken::new();
                let handle = scheduler::spawn(
                    Arc::clone(&engine),
                    Arc::clone(summarizer),
                    &engine.config().consolidation,
                    cancel.clone(),
                );
                Some((cancel, handle))
            }
            (None, true) => {
                tracing::warn!("consolidation enabled but llm.provider is \"none\"; scheduler not started");
                None
            }
            (_, false) => None,
        };

        Ok(Self {
            engine,
            summarizer,
            scheduler,
        })
    }

    fn tools(&self) -> RecollectTools {
        RecollectTools::new(Arc::clone(&self.engine), self.summarizer.clone())
    }

    /// Stop the scheduler and drop the engine on the blocking pool.
    async fn shutdown(self) {
        if let Some((cancel, handle)) = self.scheduler {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "consolidation scheduler did not stop cleanly");
            }
        }
        let Self { engine, summarizer, .. } = self;
        let _ = tokio::task::spawn_blocking(move || {
            drop(summarizer);
            drop(engine);
        })
        .await;
    }
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: RecollectConfig) -> Result<()> {
    tracing::info!("starting recollect MCP server on stdio");

    let shared = Shared::open(config).await?;
    let server = shared.tools().serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    let result = server.waiting().await;
    tracing::info!("MCP server shut down");
    shared.shutdown().await;
    result?;
    Ok(())
}

/// Start the MCP server over streamable HTTP at `http://host:port/mcp`.
pub async fn serve_http(config: RecollectConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting recollect MCP server on streamable HTTP");

    let shared = Shared::open(config).await?;
    let tools = shared.tools();

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(tools.clone()),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await;

    shared.shutdown().await;
    result?;
    Ok(())
}
