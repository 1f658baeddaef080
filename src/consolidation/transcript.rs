//! Transcript assembly for the summarizer and strict parsing of its answer.
//!
//! The answer is untrusted text. It is turned into [`SummaryBlock`]s here or
//! rejected as a whole; nothing downstream sees the raw response.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::llm::{json_object_span, END_OF_SESSION};
use crate::memory::taxonomy::{Action, Category, IntentTags, Subject};
use crate::memory::types::SessionRecord;

static BLOCK_HEADER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"===\s*MSG\s*\d+\s*===").ok());

static TRAILING_COMMA: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").ok());

/// One parsed summary, aligned with the record at the same position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryBlock {
    pub tags: IntentTags,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    category: String,
    summary: String,
}

/// Concatenate a session's records, already in chronological order.
pub fn build_transcript(records: &[SessionRecord]) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        let n = i + 1;
        out.push_str(&format!("--- MESSAGE {n} (user) ---\n{}\n", record.prompt.trim()));
        out.push_str(&format!("--- MESSAGE {n} (assistant) ---\n{}\n", record.response.trim()));
    }
    out
}

/// Instructions sent with the transcript of a `messages`-long session.
pub fn instructions(messages: usize) -> String {
    let list = |slugs: Vec<&str>| slugs.join(", ");
    format!(
        "You consolidate one conversation session of {messages} messages into memory.\n\
         Read the whole session first and decide its dominant intent. Classify every \
         message under that session-level intent: a short greeting or follow-up that \
         belongs to a longer task takes the task's subject, action and category, not the \
         label its own words would suggest.\n\
         subject is one of: {subjects}\n\
         action is one of: {actions}\n\
         category is one of: {categories}\n\
         For each message i from 1 to {messages}, write exactly one block:\n\
         === MSG i ===\n\
         {{\"subject\": \"...\", \"action\": \"...\", \"category\": \"...\", \"summary\": \"terse summary of the exchange\"}}\n\
         After the last block write {END_OF_SESSION} and stop.",
        subjects = list(Subject::ALL.iter().map(|s| s.as_str()).collect()),
        actions = list(Action::ALL.iter().map(|a| a.as_str()).collect()),
        categories = list(Category::ALL.iter().map(|c| c.as_str()).collect()),
    )
}

/// Parse a summarizer answer into exactly `expected` blocks.
///
/// Fails when the sentinel is missing (truncated answer), when a block holds
/// no decodable JSON object, or when the block count differs from `expected`.
pub fn parse_summary(response: &str, expected: usize) -> Result<Vec<SummaryBlock>> {
    let Some((body, _)) = response.split_once(END_OF_SESSION) else {
        anyhow::bail!("summary truncated: no end-of-session marker");
    };
    let header = BLOCK_HEADER
        .as_ref()
        .context("block header pattern failed to compile")?;

    let mut pieces = header.split(body);
    // Text before the first header is preamble.
    pieces.next();
    let blocks = pieces
        .enumerate()
        .map(|(i, piece)| parse_block(piece).with_context(|| format!("block {} unreadable", i + 1)))
        .collect::<Result<Vec<_>>>()?;

    anyhow::ensure!(
        blocks.len() == expected,
        "summary has {} blocks for {} messages",
        blocks.len(),
        expected
    );
    Ok(blocks)
}

fn parse_block(piece: &str) -> Result<SummaryBlock> {
    let span = json_object_span(piece).context("no JSON object")?;
    let raw: RawBlock = match serde_json::from_str(span) {
        Ok(raw) => raw,
        Err(first) => {
            let comma = TRAILING_COMMA
                .as_ref()
                .context("trailing comma pattern failed to compile")?;
            let repaired = comma.replace_all(span, "$1");
            serde_json::from_str(&repaired).with_context(|| format!("invalid JSON ({first})"))?
        }
    };
    let summary = raw.summary.trim();
    anyhow::ensure!(!summary.is_empty(), "empty summary");
    Ok(SummaryBlock {
        tags: IntentTags::from_labels(&raw.subject, &raw.action, &raw.category),
        summary: summary.to_string(),
    })
}
