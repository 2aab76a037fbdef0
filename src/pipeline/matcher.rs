//! Case-insensitive keyword matching against decoded message text.
//!
//! Keywords are lowercased once when the matcher is built; each message
//! is lowercased once per evaluation.

use tracing::debug;

use crate::rules::KeywordMapping;

/// A label whose keywords hit the text, with the keyword that hit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatch<'a> {
    pub label: &'a str,
    pub keyword: &'a str,
}

struct LabelKeywords<'a> {
    label: &'a str,
    /// (original keyword, lowercased keyword)
    keywords: Vec<(&'a str, String)>,
}

/// Matcher built from one [`KeywordMapping`] snapshot.
pub struct KeywordMatcher<'a> {
    labels: Vec<LabelKeywords<'a>>,
}

impl<'a> KeywordMatcher<'a> {
    pub fn new(mapping: &'a KeywordMapping) -> Self {
        let labels = mapping
            .iter()
            .map(|(label, keywords)| LabelKeywords {
                label,
                keywords: keywords
                    .iter()
                    .filter(|k| !k.is_empty())
                    .map(|k| (k.as_str(), k.to_lowercase()))
                    .collect(),
            })
            .collect();
        Self { labels }
    }

    /// Every label with at least one keyword contained in `text`, in
    /// mapping order. Each label is reported once, for its first hit.
    pub fn evaluate(&self, text: &str) -> Vec<LabelMatch<'a>> {
        let haystack = text.to_lowercase();
        let mut matches = Vec::new();

        for entry in &self.labels {
            if let Some(keyword) = entry
                .keywords
                .iter()
                .find(|(_, lowered)| haystack.contains(lowered.as_str()))
                .map(|(keyword, _)| *keyword)
            {
                debug!(label = entry.label, keyword, "Keyword found in message");
                matches.push(LabelMatch {
                    label: entry.label,
                    keyword,
                });
            }
        }

        matches
    }
}

/// One-shot convenience over [`KeywordMatcher`].
pub fn matching_labels<'a>(text: &str, mapping: &'a KeywordMapping) -> Vec<LabelMatch<'a>> {
    KeywordMatcher::new(mapping).evaluate(text)
}
