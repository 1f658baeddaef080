//! MCP `search_memory` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::taxonomy::IntentTags;
use crate::memory::types::MemoryClass;
use crate::retrieval::orchestrator::{SearchRequest, StageToggles};

/// Largest `top_k` a caller may ask for.
pub const MAX_TOP_K: usize = 50;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IntentParams {
    #[schemars(description = "Subject: second_mind, setup, script, file, general")]
    pub subject: Option<String>,
    #[schemars(description = "Action: do, think, talk, code, debug")]
    pub action: Option<String>,
    #[schemars(
        description = "Category: plan, test, configure, document, analyze, define, compare, ask, confirm, greet, agent, system, backend, other"
    )]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    #[schemars(
        description = "Natural language query. Words with * or ? are matched as name patterns, e.g. '*_debug_agent_*'."
    )]
    pub query: String,

    #[schemars(
        description = "Restrict to memory classes: rule, reflective_correction, consolidated_summary, raw_episodic, code_unit, document"
    )]
    pub memory_classes: Option<Vec<String>>,

    #[schemars(description = "Number of results (1-50). Defaults to the configured default_top_k.")]
    pub top_k: Option<usize>,

    #[schemars(description = "The caller's own intent classification of the query, used as a ranking bonus")]
    pub intent: Option<IntentParams>,

    #[schemars(description = "Stages to skip: 'names', 'keywords', 'vectors'")]
    pub disable_stages: Option<Vec<String>>,

    #[schemars(
        description = "If set, expand code-unit hits this many hops along the dependency graph and include a skeleton view"
    )]
    pub expand_depth: Option<usize>,
}

impl SearchMemoryParams {
    /// Validate into an orchestrator request plus the requested expand depth.
    pub fn into_request(self) -> Result<(SearchRequest, Option<usize>), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if let Some(k) = self.top_k {
            if !(1..=MAX_TOP_K).contains(&k) {
                return Err(format!("top_k must be between 1 and {MAX_TOP_K}"));
            }
        }

        let memory_classes = self
            .memory_classes
            .map(|classes| {
                classes
                    .iter()
                    .map(|c| c.parse::<MemoryClass>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let stages = StageToggles::default().without(self.disable_stages.as_deref().unwrap_or(&[]))?;

        let intent = self.intent.map(|i| {
            IntentTags::from_labels(
                i.subject.as_deref().unwrap_or(""),
                i.action.as_deref().unwrap_or(""),
                i.category.as_deref().unwrap_or(""),
            )
        });

        let request = SearchRequest {
            query: self.query,
            memory_classes,
            top_k: self.top_k,
            intent,
            stages,
        };
        Ok((request, self.expand_depth))
    }
}
