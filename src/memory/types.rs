//! Core type definitions.
//!
//! Defines [`MemoryClass`] (the fixed, ordered class set with priority and
//! retention), [`Fragment`] (the atomic retrievable unit), [`CodeMeta`] and
//! [`SessionMeta`] (optional structured metadata), and [`SessionRecord`]
//! (a raw interaction awaiting consolidation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::taxonomy::IntentTags;

/// Fixed, ordered set of memory classes. Every fragment belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClass {
    /// Standing instructions; always win ties.
    Rule,
    /// Corrections the assistant recorded about its own past mistakes.
    ReflectiveCorrection,
    /// Durable summaries written by the consolidation pipeline.
    ConsolidatedSummary,
    /// Raw interactions not yet consolidated.
    RawEpisodic,
    /// Functions, classes, methods and modules from a code-indexing run.
    CodeUnit,
    /// Reference documents and notes.
    Document,
}

/// How long a class stays findable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    Permanent,
    /// Findable until the originating session record is consolidated.
    Session,
    /// Superseded by the next code-indexing run.
    Temporary,
}

impl MemoryClass {
    pub const ALL: [MemoryClass; 6] = [
        Self::Rule,
        Self::ReflectiveCorrection,
        Self::ConsolidatedSummary,
        Self::RawEpisodic,
        Self::CodeUnit,
        Self::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::ReflectiveCorrection => "reflective_correction",
            Self::ConsolidatedSummary => "consolidated_summary",
            Self::RawEpisodic => "raw_episodic",
            Self::CodeUnit => "code_unit",
            Self::Document => "document",
        }
    }

    /// Tie-break weight: higher wins when scores are equal.
    pub fn priority_weight(&self) -> f64 {
        match self {
            Self::Rule => 1.0,
            Self::ReflectiveCorrection => 0.9,
            Self::ConsolidatedSummary => 0.7,
            Self::Document => 0.6,
            Self::CodeUnit => 0.5,
            Self::RawEpisodic => 0.2,
        }
    }

    pub fn retention(&self) -> Retention {
        match self {
            Self::Rule | Self::ReflectiveCorrection | Self::ConsolidatedSummary | Self::Document => {
                Retention::Permanent
            }
            Self::RawEpisodic => Retention::Session,
            Self::CodeUnit => Retention::Temporary,
        }
    }
}

impl std::fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "rule" => Ok(Self::Rule),
            "reflective_correction" => Ok(Self::ReflectiveCorrection),
            "consolidated_summary" => Ok(Self::ConsolidatedSummary),
            "raw_episodic" => Ok(Self::RawEpisodic),
            "code_unit" => Ok(Self::CodeUnit),
            "document" => Ok(Self::Document),
            _ => Err(format!("unknown memory class: {s}")),
        }
    }
}

/// Content-derived fragment identifier (32 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FragmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FragmentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of code unit produced by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeUnitKind {
    Module,
    Class,
    Function,
    Method,
}

impl CodeUnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
        }
    }
}

/// Structured metadata attached to code-unit fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMeta {
    /// Code-indexing run that produced this unit; only the latest run is live.
    pub run: u64,
    /// Graph key: `mod`, `mod::CLASS::Name`, `mod::FUNC::name` or `mod::METHOD::Class.name`.
    pub unit: String,
    /// Dotted module name.
    pub module: String,
    /// Source path relative to the indexed root.
    pub path: String,
    pub kind: CodeUnitKind,
    /// 1-based line of the definition (0 for modules).
    #[serde(default)]
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Base classes, for class units.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
    /// Owning class name, for method units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Modules this unit imports (module units): outgoing edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Modules importing this unit (module units): incoming edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<String>,
}

/// Links a raw or consolidated fragment back to its session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub record_id: String,
    /// 1-based position of the record within its session.
    pub turn: usize,
}

/// The atomic unit of retrievable content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub class: MemoryClass,
    /// File path, session id, URL, or a synthesized `interaction_*` name.
    pub locator: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<IntentTags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionMeta>,
    pub created_at: DateTime<Utc>,
}

impl Fragment {
    pub fn new(class: MemoryClass, locator: impl Into<String>, text: impl Into<String>) -> Self {
        let mut fragment = Self {
            id: FragmentId(String::new()),
            class,
            locator: locator.into(),
            text: text.into(),
            tags: None,
            code: None,
            session: None,
            created_at: Utc::now(),
        };
        fragment.id = fragment.content_id();
        fragment
    }

    pub fn with_tags(mut self, tags: IntentTags) -> Self {
        self.tags = Some(tags);
        self.id = self.content_id();
        self
    }

    pub fn with_code(mut self, code: CodeMeta) -> Self {
        self.code = Some(code);
        self.id = self.content_id();
        self
    }

    pub fn with_session(mut self, session: SessionMeta) -> Self {
        self.session = Some(session);
        self.id = self.content_id();
        self
    }

    /// Creation time does not participate in the id.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// SHA-256 over class, locator, text and metadata; first 16 bytes, hex.
    ///
    /// Identical content always maps to the same id, which is what makes
    /// appends and consolidation re-runs idempotent.
    pub fn content_id(&self) -> FragmentId {
        let mut hasher = Sha256::new();
        for part in [self.class.as_str(), &self.locator, &self.text] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        if let Some(tags) = &self.tags {
            hasher.update(tags.slugs().join("/").as_bytes());
        }
        if let Some(code) = &self.code {
            hasher.update(serde_json::to_vec(code).unwrap_or_default());
        }
        if let Some(session) = &self.session {
            hasher.update(serde_json::to_vec(session).unwrap_or_default());
        }
        let digest = hasher.finalize();
        FragmentId(hex::encode(&digest[..16]))
    }
}

/// A raw interaction as appended to the interaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// UUID v7, time-sortable.
    pub record_id: String,
    pub session_id: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: uuid::Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            prompt: prompt.into(),
            response: response.into(),
            timestamp,
        }
    }
}
