//! Name/pattern index: the cheapest retrieval stage.
//!
//! Locators are split on path and name separators into lemmatized tokens,
//! and an inverted map sends each token to the fragments whose name
//! contains it. A query matches a name when *every* query term is among the
//! name's tokens, or when one of its glob words (`*_debug_agent_*`) matches
//! the whole locator.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::memory::types::FragmentId;
use crate::retrieval::scorer::{lemmatize, Scorer};

#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    by_token: HashMap<String, HashSet<FragmentId>>,
    /// Lowercased locators, scanned only for glob patterns.
    locators: Vec<(FragmentId, String)>,
}

impl NameIndex {
    pub fn build<'a>(entries: impl IntoIterator<Item = (&'a FragmentId, &'a str)>) -> Self {
        let mut index = Self::default();
        for (id, locator) in entries {
            for token in name_tokens(locator) {
                index
                    .by_token
                    .entry(token)
                    .or_default()
                    .insert(id.clone());
            }
            index.locators.push((id.clone(), locator.to_lowercase()));
        }
        index
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Fragments whose name satisfies `pattern`.
    pub fn lookup(&self, pattern: &NamePattern) -> HashSet<FragmentId> {
        let mut hits = HashSet::new();

        if let Some(globs) = &pattern.globs {
            for (id, locator) in &self.locators {
                if globs.is_match(locator) {
                    hits.insert(id.clone());
                }
            }
        }

        if !pattern.tokens.is_empty() {
            // Intersect posting lists, smallest first.
            let mut postings: Vec<&HashSet<FragmentId>> = Vec::with_capacity(pattern.tokens.len());
            for token in &pattern.tokens {
                match self.by_token.get(token) {
                    Some(ids) => postings.push(ids),
                    None => return hits,
                }
            }
            postings.sort_by_key(|p| p.len());
            let (first, rest) = postings.split_at(1);
            hits.extend(
                first[0]
                    .iter()
                    .filter(|id| rest.iter().all(|p| p.contains(*id)))
                    .cloned(),
            );
        }

        hits
    }
}

/// Query-derived pattern: plain terms plus any glob words.
#[derive(Debug, Clone, Default)]
pub struct NamePattern {
    pub tokens: Vec<String>,
    globs: Option<GlobSet>,
}

impl NamePattern {
    /// Words containing `*` or `?` become case-insensitive globs; the rest go
    /// through the scorer's term pipeline so names and bodies agree on terms.
    pub fn from_query(query: &str, scorer: &Scorer) -> Result<Self> {
        let mut plain = Vec::new();
        let mut builder = GlobSetBuilder::new();
        let mut glob_count = 0usize;

        for word in query.split_whitespace() {
            if word.contains('*') || word.contains('?') {
                let glob = GlobBuilder::new(&word.to_lowercase())
                    .case_insensitive(true)
                    .literal_separator(false)
                    .build()
                    .with_context(|| format!("invalid name pattern: {word}"))?;
                builder.add(glob);
                glob_count += 1;
            } else {
                plain.push(word);
            }
        }

        let globs = if glob_count > 0 {
            Some(builder.build().context("failed to compile name patterns")?)
        } else {
            None
        };

        Ok(Self {
            tokens: scorer.terms(&plain.join(" ")).into_iter().collect(),
            globs,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.globs.is_none()
    }
}

/// Lemmatized tokens of a locator, split on `_ . / \ - :` and whitespace.
pub fn name_tokens(locator: &str) -> HashSet<String> {
    locator
        .split(|c: char| {
            matches!(c, '_' | '.' | '/' | '\\' | '-' | ':') || c.is_whitespace()
        })
        .filter(|t| !t.is_empty())
        .map(|t| lemmatize(&t.to_lowercase()))
        .collect()
}
