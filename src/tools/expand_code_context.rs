//! MCP `expand_code_context` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExpandCodeContextParams {
    #[schemars(description = "Fragment ids of code units to expand from (e.g. from search_memory hits)")]
    pub fragment_ids: Vec<String>,

    #[schemars(
        description = "Hops to follow along imports and dependents. Defaults to the configured depth; capped at max_expand_depth."
    )]
    pub depth: Option<usize>,
}
