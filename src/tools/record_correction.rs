//! MCP `record_correction` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecordCorrectionParams {
    #[schemars(description = "What went wrong, in one or two sentences")]
    pub mistake: String,

    #[schemars(description = "The directive to follow from now on (Markdown list allowed)")]
    pub correction: String,

    #[schemars(description = "RFC 3339 time the mistake was diagnosed. Defaults to now.")]
    pub timestamp: Option<String>,
}
