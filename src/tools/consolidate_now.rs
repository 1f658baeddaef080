//! MCP `consolidate_now` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsolidateNowParams {
    #[schemars(
        description = "RFC 3339 time to evaluate inactivity windows against. Defaults to now."
    )]
    pub as_of: Option<String>,
}
