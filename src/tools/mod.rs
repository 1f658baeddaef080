pub mod consolidate_now;
pub mod expand_code_context;
pub mod index_status;
pub mod record_correction;
pub mod record_interaction;
pub mod search_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use consolidate_now::ConsolidateNowParams;
use expand_code_context::ExpandCodeContextParams;
use index_status::IndexStatusParams;
use record_correction::RecordCorrectionParams;
use record_interaction::{parse_timestamp, RecordInteractionParams};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_memory::SearchMemoryParams;
use tokio_util::sync::CancellationToken;

use crate::consolidation;
use crate::engine::Engine;
use crate::llm::Summarizer;
use crate::memory::types::FragmentId;

/// The recollect MCP tool handler. Holds the shared engine and the optional
/// summarizer and exposes the query interface via `#[tool_router]`.
#[derive(Clone)]
pub struct RecollectTools {
    tool_router: ToolRouter<Self>,
    engine: Arc<Engine>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

#[tool_router]
impl RecollectTools {
    pub fn new(engine: Arc<Engine>, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
            summarizer,
        }
    }

    /// Cascading search over every memory class.
    #[tool(description = "Search memory: name patterns, then keywords, then vector similarity, ranked by query coverage. Optionally expands code hits along the dependency graph.")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
    ) -> Result<String, String> {
        let (request, expand_depth) = params.into_request()?;
        tracing::info!(query = %request.query, top_k = ?request.top_k, "search_memory called");

        // Dropping this future (client cancelled) cancels the blocking search.
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let engine = Arc::clone(&self.engine);
        let result = tokio::task::spawn_blocking(move || {
            engine.search_with_context(&request, expand_depth, &cancel)
        })
        .await
        .map_err(|e| format!("search task failed: {e}"))?
        .map_err(|e| format!("search failed: {e}"))?;

        tracing::info!(
            hits = result.outcome.hits.len(),
            generation = result.outcome.generation,
            "search_memory done"
        );
        serde_json::to_string(&result).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Dependency-graph neighbourhood of code units, with a skeleton view.
    #[tool(description = "Expand code units along imports and dependents. Returns the reached units and a module/class/signature skeleton without bodies.")]
    async fn expand_code_context(
        &self,
        Parameters(params): Parameters<ExpandCodeContextParams>,
    ) -> Result<String, String> {
        if params.fragment_ids.is_empty() {
            return Err("fragment_ids must not be empty".into());
        }
        tracing::info!(seeds = params.fragment_ids.len(), depth = ?params.depth, "expand_code_context called");

        let seeds: Vec<FragmentId> = params.fragment_ids.into_iter().map(FragmentId::from).collect();
        let engine = Arc::clone(&self.engine);
        let expansion = tokio::task::spawn_blocking(move || engine.expand(&seeds, params.depth))
            .await
            .map_err(|e| format!("expand task failed: {e}"))?
            .map_err(|e| format!("expand failed: {e}"))?;

        serde_json::to_string(&expansion).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Append a raw interaction for later consolidation.
    #[tool(description = "Record one user/assistant exchange. It is searchable immediately as raw_episodic and consolidated into summaries after the session goes quiet.")]
    async fn record_interaction(
        &self,
        Parameters(params): Parameters<RecordInteractionParams>,
    ) -> Result<String, String> {
        if params.session_id.trim().is_empty() {
            return Err("session_id must not be empty".into());
        }
        let at = parse_timestamp(params.timestamp.as_deref())?;
        tracing::info!(session = %params.session_id, "record_interaction called");

        let engine = Arc::clone(&self.engine);
        let recorded = tokio::task::spawn_blocking(move || {
            engine.record_interaction(&params.session_id, &params.prompt, &params.response, at)
        })
        .await
        .map_err(|e| format!("record task failed: {e}"))?
        .map_err(|e| format!("record failed: {e}"))?;

        serde_json::to_string(&recorded).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Store a self-correction so later searches surface it ahead of
    /// summaries and documents.
    #[tool(description = "Record a correction learned from a mistake. Stored permanently as reflective_correction, which ranks right after rules.")]
    async fn record_correction(
        &self,
        Parameters(params): Parameters<RecordCorrectionParams>,
    ) -> Result<String, String> {
        if params.mistake.trim().is_empty() || params.correction.trim().is_empty() {
            return Err("mistake and correction must not be empty".into());
        }
        let at = parse_timestamp(params.timestamp.as_deref())?;
        tracing::info!("record_correction called");

        let engine = Arc::clone(&self.engine);
        let recorded = tokio::task::spawn_blocking(move || {
            engine.record_correction(&params.mistake, &params.correction, at)
        })
        .await
        .map_err(|e| format!("record task failed: {e}"))?
        .map_err(|e| format!("record failed: {e}"))?;

        serde_json::to_string(&recorded).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Run a consolidation sweep now.
    #[tool(description = "Consolidate every session that has been inactive past the configured window. Returns the sweep report.")]
    async fn consolidate_now(
        &self,
        Parameters(params): Parameters<ConsolidateNowParams>,
    ) -> Result<String, String> {
        let Some(summarizer) = self.summarizer.clone() else {
            return Err("no summarizer configured (llm.provider = \"none\")".into());
        };
        let now: DateTime<Utc> = parse_timestamp(params.as_of.as_deref())?;
        tracing::info!(%now, "consolidate_now called");

        let engine = Arc::clone(&self.engine);
        let report = tokio::task::spawn_blocking(move || {
            consolidation::sweep(&engine, summarizer.as_ref(), now)
        })
        .await
        .map_err(|e| format!("sweep task failed: {e}"))?
        .map_err(|e| format!("sweep failed: {e}"))?;

        serde_json::to_string(&report).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Counters of the active index generation and the consolidation ledger.
    #[tool(description = "Report the active index generation: fragment counts by class, vector and offset counts, graph size, and consolidation progress.")]
    async fn index_status(
        &self,
        Parameters(_params): Parameters<IndexStatusParams>,
    ) -> Result<String, String> {
        let engine = Arc::clone(&self.engine);
        let status = tokio::task::spawn_blocking(move || engine.status())
            .await
            .map_err(|e| format!("status task failed: {e}"))?
            .map_err(|e| format!("status failed: {e}"))?;

        serde_json::to_string(&status).map_err(|e| format!("serialization failed: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for RecollectTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "recollect is a memory-retrieval server. Use search_memory to find rules, \
                 summaries, documents and code; expand_code_context for surrounding code; \
                 record_interaction to log exchanges; record_correction to keep a lesson \
                 learned from a mistake."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
