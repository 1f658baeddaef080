//! Language-model collaborators: the session summarizer and the intent
//! classifier.
//!
//! Both are synchronous, like [`EmbeddingProvider`](crate::embedding::EmbeddingProvider);
//! async callers go through `tokio::task::spawn_blocking`.

pub mod http;

use anyhow::Result;

use crate::config::LlmConfig;
use crate::memory::taxonomy::IntentTags;

/// Marks the end of a complete summarizer answer. A response without it was
/// cut short.
pub const END_OF_SESSION: &str = "=== END OF SESSION ===";

/// Turns a session transcript into per-message summary blocks.
pub trait Summarizer: Send + Sync {
    /// Run `instructions` over `transcript`. The answer must end with
    /// [`END_OF_SESSION`] when the model finished on its own.
    fn summarize(&self, transcript: &str, instructions: &str) -> Result<String>;
}

/// Assigns the (subject, action, category) triple to one interaction.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<IntentTags>;
}

/// Classifier used when no model is configured: everything is
/// `general / talk / other`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackClassifier;

impl IntentClassifier for FallbackClassifier {
    fn classify(&self, _text: &str) -> Result<IntentTags> {
        Ok(IntentTags::default())
    }
}

/// Create the summarizer from config. `"none"` yields `None`, which leaves
/// consolidation without a collaborator.
pub fn create_summarizer(config: &LlmConfig) -> Result<Option<Box<dyn Summarizer>>> {
    match config.provider.as_str() {
        "http" => Ok(Some(Box::new(http::HttpSummarizer::new(config)?))),
        "none" => Ok(None),
        other => anyhow::bail!("unknown llm provider: {other}. Supported: http, none"),
    }
}

/// Create the intent classifier from config.
pub fn create_classifier(config: &LlmConfig) -> Result<Box<dyn IntentClassifier>> {
    match config.provider.as_str() {
        "http" => Ok(Box::new(http::HttpClassifier::new(config)?)),
        "none" => Ok(Box::new(FallbackClassifier)),
        other => anyhow::bail!("unknown llm provider: {other}. Supported: http, none"),
    }
}

/// The slice of `text` between the first `{` and the last `}`, inclusive.
pub(crate) fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
