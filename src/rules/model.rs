//! Rule and keyword mapping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A label together with the keywords that trigger it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Normalized (lowercase) label, unique across the store.
    pub label: String,
    /// Deduplicated keywords in insertion order.
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn contains_keyword(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k == keyword)
    }
}

/// Lowercase and trim a label for storage and lookup.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Trim keywords, drop empty ones and remove duplicates, keeping the order
/// in which each keyword first appeared.
pub fn dedup_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for keyword in keywords {
        let keyword = keyword.as_ref().trim();
        if keyword.is_empty() || out.iter().any(|k| k == keyword) {
            continue;
        }
        out.push(keyword.to_string());
    }
    out
}

/// Append keywords not already present. Returns true if anything was added.
pub fn merge_keywords<S: AsRef<str>>(existing: &mut Vec<String>, incoming: &[S]) -> bool {
    let before = existing.len();
    for keyword in dedup_keywords(incoming) {
        if !existing.contains(&keyword) {
            existing.push(keyword);
        }
    }
    existing.len() != before
}

/// Snapshot of every rule, taken once per labeling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordMapping {
    entries: Vec<(String, Vec<String>)>,
}

impl KeywordMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label. Later inserts for an existing label replace its keywords.
    pub fn insert(&mut self, label: impl Into<String>, keywords: Vec<String>) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = keywords,
            None => self.entries.push((label, keywords)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, k)| k.as_slice())
    }

    /// Labels and keywords in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(label, keywords)| (label.as_str(), keywords.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L, K> FromIterator<(L, Vec<K>)> for KeywordMapping
where
    L: Into<String>,
    K: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (L, Vec<K>)>>(iter: T) -> Self {
        let mut mapping = Self::new();
        for (label, keywords) in iter {
            mapping.insert(label, keywords.into_iter().map(Into::into).collect());
        }
        mapping
    }
}
