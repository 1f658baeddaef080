//! MCP `record_interaction` tool parameters.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecordInteractionParams {
    #[schemars(description = "Conversation session id; records of one session are consolidated together")]
    pub session_id: String,

    #[schemars(description = "The user's message")]
    pub prompt: String,

    #[schemars(description = "The assistant's reply")]
    pub response: String,

    #[schemars(description = "RFC 3339 time of the interaction. Defaults to now.")]
    pub timestamp: Option<String>,
}

/// Parse an optional RFC 3339 timestamp, defaulting to now.
pub fn parse_timestamp(value: Option<&str>) -> Result<DateTime<Utc>, String> {
    match value {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}")),
    }
}
