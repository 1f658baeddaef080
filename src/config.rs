use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RecollectConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

/// Summarization and intent-classification collaborator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub endpoint: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub vector_candidates: usize,
    pub default_expand_depth: usize,
    pub max_expand_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub title_boost: f64,
    pub tag_bonus: f64,
    pub max_tag_bonus: f64,
    pub stop_words: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    pub inactivity_timeout_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 8787,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_recollect_dir()
            .join("data")
            .to_string_lossy()
            .into_owned();
        Self { data_dir }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "http".into(),
            endpoint: "http://127.0.0.1:8080/v1/embeddings".into(),
            model: "all-MiniLM-L6-v2".into(),
            dimensions: crate::embedding::EMBEDDING_DIM,
            timeout_secs: 10,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "http".into(),
            endpoint: "http://127.0.0.1:8081/completion".into(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout_secs: 300,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            vector_candidates: 50,
            default_expand_depth: 1,
            max_expand_depth: 3,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title_boost: 1.2,
            tag_bonus: 0.1,
            max_tag_bonus: 0.3,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactivity_timeout_hours: 4,
            sweep_interval_secs: 900,
        }
    }
}

/// Stop words dropped before coverage is computed. Short domain terms
/// (`db`, `ui`, `api`) are deliberately absent.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our",
    "out", "has", "have", "had", "this", "that", "with", "from", "they", "will", "would", "there",
    "their", "what", "when", "which", "who", "how", "why", "where", "into", "than", "then",
    "them", "these", "those", "some", "such", "just", "about", "also", "its", "is", "it", "in",
    "of", "on", "or", "to", "an", "as", "at", "be", "by", "do", "if", "me", "my", "no", "so",
    "we", "he", "she", "i", "a", "le", "la", "les", "de", "des", "du", "un", "une", "est", "et",
];

/// Returns `~/.recollect/`
pub fn default_recollect_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".recollect")
}

/// Returns the default config file path: `~/.recollect/config.toml`
pub fn default_config_path() -> PathBuf {
    default_recollect_dir().join("config.toml")
}

impl RecollectConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RecollectConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (RECOLLECT_DATA_DIR, RECOLLECT_LOG_LEVEL,
    /// RECOLLECT_EMBEDDING_URL, RECOLLECT_LLM_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RECOLLECT_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("RECOLLECT_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("RECOLLECT_EMBEDDING_URL") {
            self.embedding.endpoint = val;
        }
        if let Ok(val) = std::env::var("RECOLLECT_LLM_URL") {
            self.llm.endpoint = val;
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.scoring.title_boost > 1.0,
            "scoring.title_boost must be greater than 1.0 (got {})",
            self.scoring.title_boost
        );
        anyhow::ensure!(
            self.scoring.tag_bonus >= 0.0 && self.scoring.max_tag_bonus >= 0.0,
            "scoring.tag_bonus and scoring.max_tag_bonus must not be negative"
        );
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.retrieval.vector_candidates > 0,
            "retrieval.vector_candidates must be positive"
        );
        Ok(())
    }

    /// Resolve the data directory, expanding `~` if needed.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }

    /// Config pointing every persisted file at `dir`. Used by tests and `--data-dir`.
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.storage.data_dir = dir.as_ref().to_string_lossy().into_owned();
        self
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
