//! Clients for a llama-server style `/completion` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{json_object_span, IntentClassifier, Summarizer, END_OF_SESSION};
use crate::config::LlmConfig;
use crate::memory::taxonomy::{Action, Category, IntentTags, Subject};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: usize,
    temperature: f32,
    stop: &'a [&'a str],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    stopped_word: bool,
    #[serde(default)]
    stopping_word: String,
}

/// Shared blocking client for both collaborators.
struct CompletionClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    max_tokens: usize,
    temperature: f32,
}

impl CompletionClient {
    fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build llm HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn complete(&self, prompt: &str, stop: &[&str], max_tokens: usize) -> Result<CompletionResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&CompletionRequest {
                prompt,
                n_predict: max_tokens,
                temperature: self.temperature,
                stop,
                stream: false,
            })
            .send()
            .with_context(|| format!("completion request to {} failed", self.endpoint))?;

        anyhow::ensure!(
            response.status().is_success(),
            "llm server answered HTTP {}",
            response.status()
        );

        response
            .json()
            .context("llm server returned malformed JSON")
    }
}

fn chat_prompt(system: &str, user: &str) -> String {
    format!(
        "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
    )
}

/// Summarizer that stops generation on [`END_OF_SESSION`].
pub struct HttpSummarizer {
    inner: CompletionClient,
}

impl HttpSummarizer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let inner = CompletionClient::new(config)?;
        tracing::info!(endpoint = %config.endpoint, "summarizer client ready");
        Ok(Self { inner })
    }
}

impl Summarizer for HttpSummarizer {
    fn summarize(&self, transcript: &str, instructions: &str) -> Result<String> {
        let prompt = chat_prompt(
            instructions,
            &format!("Here is the transcript to analyze:\n{transcript}"),
        );
        let response = self
            .inner
            .complete(&prompt, &[END_OF_SESSION], self.inner.max_tokens)?;
        Ok(restore_sentinel(response))
    }
}

/// The server strips the stop word from `content`; put it back when the
/// model actually reached it so the parser can tell a finished answer from a
/// truncated one.
fn restore_sentinel(response: CompletionResponse) -> String {
    let mut content = response.content;
    if response.stopped_word && response.stopping_word == END_OF_SESSION && !content.contains(END_OF_SESSION) {
        content.push_str(END_OF_SESSION);
    }
    content
}

const CLASSIFIER_TOKENS: usize = 96;

/// Intent classifier asking for a single JSON object.
pub struct HttpClassifier {
    inner: CompletionClient,
    instructions: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Labels {
    subject: String,
    action: String,
    category: String,
}

impl HttpClassifier {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let inner = CompletionClient::new(config)?;
        tracing::info!(endpoint = %config.endpoint, "intent classifier client ready");
        Ok(Self {
            inner,
            instructions: classifier_instructions(),
        })
    }
}

impl IntentClassifier for HttpClassifier {
    fn classify(&self, text: &str) -> Result<IntentTags> {
        let prompt = chat_prompt(&self.instructions, text);
        let response = self.inner.complete(&prompt, &[], CLASSIFIER_TOKENS)?;
        parse_labels(&response.content)
    }
}

fn classifier_instructions() -> String {
    let join = |slugs: Vec<&str>| slugs.join(", ");
    format!(
        "Classify the user's message. Answer with one JSON object and nothing else:\n\
         {{\"subject\": \"...\", \"action\": \"...\", \"category\": \"...\"}}\n\
         subject is one of: {}\n\
         action is one of: {}\n\
         category is one of: {}\n\
         When the subject is script, file or second_mind the action cannot be talk.",
        join(Subject::ALL.iter().map(|s| s.as_str()).collect()),
        join(Action::ALL.iter().map(|a| a.as_str()).collect()),
        join(Category::ALL.iter().map(|c| c.as_str()).collect()),
    )
}

fn parse_labels(content: &str) -> Result<IntentTags> {
    let span = json_object_span(content).context("classifier answer holds no JSON object")?;
    let labels: Labels =
        serde_json::from_str(span).context("classifier answer is not valid JSON")?;
    Ok(IntentTags::from_labels(
        &labels.subject,
        &labels.action,
        &labels.category,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str, stopped_word: bool, stopping_word: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.into(),
            stopped_word,
            stopping_word: stopping_word.into(),
        }
    }

    #[test]
    fn test_sentinel_is_restored_when_the_model_stopped_on_it() {
        let out = restore_sentinel(response("=== MSG 1 ===\n{}\n", true, END_OF_SESSION));
        assert!(out.ends_with(END_OF_SESSION));
    }

    #[test]
    fn test_truncated_answer_keeps_no_sentinel() {
        let out = restore_sentinel(response("=== MSG 1 ===\n{\"subj", false, ""));
        assert!(!out.contains(END_OF_SESSION));
    }

    #[test]
    fn test_sentinel_is_not_doubled() {
        let text = format!("done {END_OF_SESSION}");
        let out = restore_sentinel(response(&text, true, END_OF_SESSION));
        assert_eq!(out.matches(END_OF_SESSION).count(), 1);
    }

    #[test]
    fn test_labels_map_fuzzily() {
        let tags = parse_labels("```json\n{\"subject\": \"Script\", \"action\": \"Debugger\", \"category\": \"agent\"}\n```").unwrap();
        assert_eq!(tags, IntentTags::new(Subject::Script, Action::Debug, Category::Agent));
    }

    #[test]
    fn test_missing_labels_fall_back() {
        let tags = parse_labels("{\"subject\": \"setup\"}").unwrap();
        assert_eq!(tags.subject, Subject::Setup);
        assert_eq!(tags.action, Action::Talk);
        assert_eq!(tags.category, Category::Other);
    }

    #[test]
    fn test_prose_answer_is_an_error() {
        assert!(parse_labels("I think this is about scripts.").is_err());
    }

    #[test]
    fn test_instructions_list_every_slug() {
        let text = classifier_instructions();
        assert!(text.contains("second_mind"));
        assert!(text.contains("debug"));
        assert!(text.contains("backend"));
    }
}
