//! Coverage-based relevance scorer.
//!
//! Coverage is `|query terms found| / |query terms|`: a long fragment that
//! contains every query term scores 1.0 instead of the near-zero value a
//! Jaccard ratio would give it. Three signals combine:
//!
//! - content coverage,
//! - locator ("title") coverage multiplied by `title_boost`, capped at 1.0,
//! - a fixed bonus per intent tag that matches, capped at `max_tag_bonus`.
//!
//! `score = min(1, max(content, title) + bonus)`.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::config::ScoringConfig;
use crate::memory::taxonomy::IntentTags;
use crate::memory::types::Fragment;

/// Per-signal view of a score, mostly for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub content: f64,
    pub title: f64,
    pub intent_bonus: f64,
    pub total: f64,
}

/// What the scorer needs to know about a candidate.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub text: &'a str,
    pub locator: &'a str,
    pub tags: Option<&'a IntentTags>,
}

impl<'a> From<&'a Fragment> for Candidate<'a> {
    fn from(fragment: &'a Fragment) -> Self {
        Self {
            text: &fragment.text,
            locator: &fragment.locator,
            tags: fragment.tags.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scorer {
    stop_words: HashSet<String>,
    title_boost: f64,
    tag_bonus: f64,
    max_tag_bonus: f64,
}

impl Scorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            stop_words: config.stop_words.iter().map(|w| w.to_lowercase()).collect(),
            title_boost: config.title_boost,
            tag_bonus: config.tag_bonus,
            max_tag_bonus: config.max_tag_bonus,
        }
    }

    /// Distinct, lemmatized, stop-word-free terms of `text`.
    pub fn terms(&self, text: &str) -> BTreeSet<String> {
        tokenize(text)
            .into_iter()
            .filter(|t| t.chars().count() > 1 && !self.stop_words.contains(t))
            .map(|t| lemmatize(&t))
            .collect()
    }

    /// Fraction of `query_terms` present in `text`. Zero when there are no query terms.
    pub fn coverage(&self, query_terms: &BTreeSet<String>, text: &str) -> f64 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms = self.terms(text);
        let found = query_terms.intersection(&text_terms).count();
        found as f64 / query_terms.len() as f64
    }

    /// Score a fragment against a query.
    pub fn score(&self, query: &str, fragment: &Fragment) -> f64 {
        self.breakdown(query, Candidate::from(fragment), None).total
    }

    /// Full breakdown. `intent` is the caller's own classification of the
    /// query, if any; each fragment tag equal to it (or to a query term)
    /// earns the tag bonus.
    pub fn breakdown(
        &self,
        query: &str,
        candidate: Candidate<'_>,
        intent: Option<&IntentTags>,
    ) -> ScoreBreakdown {
        let query_terms = self.terms(query);
        if query_terms.is_empty() {
            return ScoreBreakdown {
                content: 0.0,
                title: 0.0,
                intent_bonus: 0.0,
                total: 0.0,
            };
        }

        let content = self.coverage(&query_terms, candidate.text);
        let title_text = title_words(candidate.locator);
        let title = (self.coverage(&query_terms, &title_text) * self.title_boost).min(1.0);
        let intent_bonus = candidate
            .tags
            .map(|tags| self.intent_bonus(&query_terms, tags, intent))
            .unwrap_or(0.0);

        let total = (content.max(title) + intent_bonus).clamp(0.0, 1.0);
        ScoreBreakdown {
            content,
            title,
            intent_bonus,
            total,
        }
    }

    fn intent_bonus(
        &self,
        query_terms: &BTreeSet<String>,
        tags: &IntentTags,
        intent: Option<&IntentTags>,
    ) -> f64 {
        let slots = tags.slugs();
        let wanted = intent.map(IntentTags::slugs);
        let matches = slots
            .iter()
            .enumerate()
            .filter(|(slot, slug)| {
                query_terms.contains(&lemmatize(slug))
                    || wanted.is_some_and(|w| w[*slot] == **slug)
            })
            .count();
        (matches as f64 * self.tag_bonus).min(self.max_tag_bonus)
    }
}

/// Maximal runs of alphanumeric characters or `_`, lowercased.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Shallow suffix stripping: plural `s` (not `ss`) on tokens longer than 3
/// chars, `x` on tokens longer than 4.
pub fn lemmatize(token: &str) -> String {
    let len = token.chars().count();
    if len > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else if len > 4 && token.ends_with('x') {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Locator with path and name separators turned into spaces.
fn title_words(locator: &str) -> String {
    locator
        .chars()
        .map(|c| match c {
            '_' | '.' | '/' | '\\' | '-' | ':' => ' ',
            other => other,
        })
        .collect()
}
