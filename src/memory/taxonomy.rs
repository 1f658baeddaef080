//! The closed intent taxonomy and the locator naming scheme built on it.
//!
//! Every raw or consolidated fragment is named
//! `interaction_<subject>_<action>_<category>_<YYYYmmdd_HHMMSS>`; the name
//! stage of the orchestrator matches pattern queries against these names, so
//! the slugs below are part of the on-disk contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generates a closed taxonomy enum with a stable slug, a strict `FromStr`,
/// and a forgiving [`fuzzy`](Subject::fuzzy) mapping for collaborator output.
macro_rules! taxonomy {
    (
        $(#[$meta:meta])*
        $name:ident, fallback = $fallback:ident {
            $($variant:ident => $slug:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $slug),+
                }
            }

            /// Variant used when a label cannot be mapped.
            pub fn fallback() -> Self {
                Self::$fallback
            }

            /// Map a free-form label (any case, `-`/`_`/space separated, or a
            /// known alias) onto the taxonomy, falling back when nothing matches.
            pub fn fuzzy(label: &str) -> Self {
                let wanted = normalize_label(label);
                $(
                    if wanted == normalize_label($slug) $(|| wanted == normalize_label($alias))* {
                        return Self::$variant;
                    }
                )+
                tracing::debug!(label, taxonomy = stringify!($name), "unmapped label, using fallback");
                Self::$fallback
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$fallback
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($slug => Ok(Self::$variant),)+
                    _ => Err(format!("unknown {}: {s}", stringify!($name).to_lowercase())),
                }
            }
        }
    };
}

taxonomy! {
    /// What the interaction is about.
    Subject, fallback = General {
        SecondMind => "second_mind" | "secondmind",
        Setup => "setup" | "installation",
        Script => "script",
        File => "file" | "fichier",
        General => "general" | "general_topic",
    }
}

taxonomy! {
    /// What the user was doing.
    Action, fallback = Talk {
        Do => "do" | "faire",
        Think => "think" | "penser",
        Talk => "talk" | "parler",
        Code => "code" | "coder",
        Debug => "debug" | "debugger",
    }
}

taxonomy! {
    /// Finer-grained purpose of the interaction.
    Category, fallback = Other {
        Plan => "plan" | "planifier",
        Test => "test" | "tester",
        Configure => "configure" | "configurer",
        Document => "document" | "documenter",
        Analyze => "analyze" | "analyser" | "analyse",
        Define => "define" | "definir",
        Compare => "compare" | "comparer",
        Ask => "ask" | "demander",
        Confirm => "confirm" | "confirmer",
        Greet => "greet" | "saluer" | "greeting",
        Agent => "agent",
        System => "system" | "systeme",
        Backend => "backend",
        Other => "other" | "autre",
    }
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .collect()
}

/// Accent folding for the handful of characters the aliases use.
fn fold_accent(c: char) -> char {
    match c {
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'à' | 'â' => 'a',
        'î' | 'ï' => 'i',
        'ô' => 'o',
        'ù' | 'û' => 'u',
        'ç' => 'c',
        other => other,
    }
}

/// The (subject, action, category) triple assigned by the intent classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IntentTags {
    pub subject: Subject,
    pub action: Action,
    pub category: Category,
}

impl IntentTags {
    pub fn new(subject: Subject, action: Action, category: Category) -> Self {
        Self {
            subject,
            action,
            category,
        }
    }

    /// Build tags from untrusted labels, mapping each slot fuzzily.
    pub fn from_labels(subject: &str, action: &str, category: &str) -> Self {
        Self {
            subject: Subject::fuzzy(subject),
            action: Action::fuzzy(action),
            category: Category::fuzzy(category),
        }
    }

    /// Slugs in slot order: subject, action, category.
    pub fn slugs(&self) -> [&'static str; 3] {
        [
            self.subject.as_str(),
            self.action.as_str(),
            self.category.as_str(),
        ]
    }
}

/// Synthesize `interaction_<subject>_<action>_<category>_<YYYYmmdd_HHMMSS>`.
pub fn interaction_locator(tags: &IntentTags, at: DateTime<Utc>) -> String {
    format!(
        "interaction_{}_{}_{}_{}",
        tags.subject,
        tags.action,
        tags.category,
        at.format("%Y%m%d_%H%M%S")
    )
}
