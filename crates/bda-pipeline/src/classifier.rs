//! Category vocabulary and normalization of free-text classifier output
//!
//! The vision-language model is asked to list damaged-target categories. Its
//! answer is free text, so it is forced into the closed vocabulary here.
//! Normalization is total: anything that does not match degrades to "not
//! detected" instead of failing the pipeline.

use crate::doctrine::Doctrine;
use bda_core::Detection;
use std::collections::HashSet;

/// Separator between labels in classifier output
pub const LIST_SEPARATOR: char = ',';

/// Ordered, closed set of category labels the pipeline may detect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryVocabulary {
    labels: Vec<String>,
}

impl CategoryVocabulary {
    /// Create a vocabulary; duplicate labels keep their first position
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let labels = labels
            .into_iter()
            .map(Into::into)
            .filter(|label| seen.insert(label.clone()))
            .collect();
        Self { labels }
    }

    /// Doctrine keys minus the reserved functional damage key
    pub fn from_doctrine(doctrine: &Doctrine) -> Self {
        Self::new(doctrine.categories())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Normalize raw classifier output against this vocabulary
    pub fn normalize(&self, raw_text: &str) -> Vec<String> {
        normalize(raw_text, self)
    }

    /// Label-only detections for raw classifier output
    pub fn detections(&self, raw_text: &str) -> Vec<Detection> {
        self.normalize(raw_text)
            .into_iter()
            .map(Detection::new)
            .collect()
    }
}

/// Normalize raw model text into vocabulary labels.
///
/// Newlines count as separators. Each candidate is trimmed, loses one layer
/// of surrounding quotes and is lowercased; only exact vocabulary members are
/// kept, first occurrence wins.
pub fn normalize(raw_text: &str, vocabulary: &CategoryVocabulary) -> Vec<String> {
    if raw_text.trim().is_empty() {
        return Vec::new();
    }

    let mut labels: Vec<String> = Vec::new();
    let joined = raw_text.replace('\n', &LIST_SEPARATOR.to_string());

    for candidate in joined.split(LIST_SEPARATOR) {
        let label = clean_candidate(candidate);
        if vocabulary.contains(&label) && !labels.contains(&label) {
            labels.push(label);
        }
    }

    labels
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

fn clean_candidate(candidate: &str) -> String {
    let trimmed = candidate.trim();
    let unquoted = trimmed.strip_prefix(is_quote).unwrap_or(trimmed);
    let unquoted = unquoted.strip_suffix(is_quote).unwrap_or(unquoted);
    unquoted.trim().to_lowercase()
}
