#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use recollect::config::RecollectConfig;
use recollect::embedding::EmbeddingProvider;
use recollect::engine::Engine;
use recollect::llm::{FallbackClassifier, Summarizer, END_OF_SESSION};
use recollect::memory::types::{Fragment, MemoryClass};
use tempfile::TempDir;

pub const DIM: usize = 128;

/// Deterministic embedder: one spike per distinct word, L2-normalized.
/// Texts sharing words are similar; texts sharing none are orthogonal.
pub struct TestEmbedder;

impl EmbeddingProvider for TestEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[spike(&word.to_lowercase())] = 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// FNV-1a, so spike positions do not depend on the std hasher seed.
fn spike(word: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % DIM as u64) as usize
}

pub fn test_config(dir: &Path) -> RecollectConfig {
    RecollectConfig::default().with_data_dir(dir)
}

/// Open an engine over `tmp` with the test embedder and no classifier.
pub fn open_engine(tmp: &TempDir) -> Engine {
    open_engine_with(test_config(tmp.path()))
}

pub fn open_engine_with(config: RecollectConfig) -> Engine {
    Engine::open(config, Box::new(TestEmbedder), Box::new(FallbackClassifier)).unwrap()
}

pub fn fragment(class: MemoryClass, locator: &str, text: &str) -> Fragment {
    Fragment::new(class, locator, text)
}

/// Number of messages in a transcript built for the summarizer.
pub fn message_count(transcript: &str) -> usize {
    transcript.matches("(user) ---").count()
}

/// Format a well-formed summarizer answer from `(subject, action, category, summary)` blocks.
pub fn answer(blocks: &[(&str, &str, &str, &str)]) -> String {
    let mut out = String::from("Here is the consolidated session.\n");
    for (i, (subject, action, category, summary)) in blocks.iter().enumerate() {
        out.push_str(&format!(
            "=== MSG {} ===\n{{\"subject\": \"{subject}\", \"action\": \"{action}\", \"category\": \"{category}\", \"summary\": \"{summary}\"}}\n",
            i + 1
        ));
    }
    out.push_str(END_OF_SESSION);
    out
}

/// Summarizer that honors the session-level intent instruction: the whole
/// session is labelled from its most specific message.
pub struct DominantIntentSummarizer {
    pub calls: AtomicUsize,
}

impl DominantIntentSummarizer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for DominantIntentSummarizer {
    fn summarize(&self, transcript: &str, _instructions: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = transcript.to_lowercase();
        let (subject, action, category) = if lower.contains("bug") {
            ("script", "debug", "test")
        } else if lower.contains("install") {
            ("setup", "do", "configure")
        } else {
            ("general", "talk", "greet")
        };

        let summaries: Vec<String> = lower
            .split("--- message ")
            .filter(|chunk| chunk.contains("(user) ---"))
            .map(|chunk| {
                let prompt = chunk
                    .lines()
                    .nth(1)
                    .unwrap_or_default()
                    .replace('"', "'");
                format!("{action} {subject}: user said '{prompt}'")
            })
            .collect();
        let blocks: Vec<(&str, &str, &str, &str)> = summaries
            .iter()
            .map(|s| (subject, action, category, s.as_str()))
            .collect();
        Ok(answer(&blocks))
    }
}

/// Summarizer that plays back canned responses in order, then repeats the last.
pub struct ScriptedSummarizer {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    last: Mutex<Option<std::result::Result<String, String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for ScriptedSummarizer {
    fn summarize(&self, _transcript: &str, _instructions: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        let response = match next {
            Some(r) => {
                *self.last.lock().unwrap() = Some(r.clone());
                r
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err("no scripted response".into())),
        };
        response.map_err(anyhow::Error::msg)
    }
}
