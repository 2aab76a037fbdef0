//! Labeling pass: list every message, decode it, match keywords and
//! move matching messages out of the inbox under their labels.
//!
//! Messages are processed one at a time. A failure on one message is
//! logged and counted, never fatal to the pass.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::ProviderError;
use crate::mail::{INBOX_LABEL, MailMessage, MailSource, collect_message_refs, ensure_label};
use crate::pipeline::decoder::decode_message;
use crate::pipeline::matcher::KeywordMatcher;
use crate::rules::KeywordMapping;

/// Counters for one labeling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub messages_seen: usize,
    /// Messages that received at least one label.
    pub messages_labeled: usize,
    pub labels_applied: usize,
    pub failures: usize,
}

/// Label ids resolved during a pass, keyed by lowercase label name.
#[derive(Debug, Default)]
pub struct LabelCache {
    ids: HashMap<String, String>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.ids.get(&name.to_lowercase()).map(String::as_str)
    }

    fn insert(&mut self, name: &str, id: String) {
        self.ids.insert(name.to_lowercase(), id);
    }
}

/// Outcome of labeling a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Names of the labels applied, in mapping order.
    pub applied: Vec<String>,
    pub failures: usize,
}

pub struct Labeler {
    source: Arc<dyn MailSource>,
}

impl Labeler {
    pub fn new(source: Arc<dyn MailSource>) -> Self {
        Self { source }
    }

    /// Run one pass over every message in the listing.
    ///
    /// Only a failure to list messages aborts the pass.
    pub async fn run(&self, mapping: &KeywordMapping) -> Result<PassSummary, ProviderError> {
        let mut summary = PassSummary::default();
        if mapping.is_empty() {
            info!("No labeling rules configured, skipping pass");
            return Ok(summary);
        }

        let matcher = KeywordMatcher::new(mapping);
        let mut cache = LabelCache::new();

        let refs = collect_message_refs(self.source.as_ref()).await?;
        info!(count = refs.len(), labels = mapping.len(), "Starting labeling pass");

        for message_ref in refs {
            summary.messages_seen += 1;

            let message = match self.source.get_message(&message_ref.id).await {
                Ok(message) => message,
                Err(e) => {
                    error!(id = %message_ref.id, error = %e, "Failed to fetch message");
                    summary.failures += 1;
                    continue;
                }
            };

            let outcome = self.label_message(&message, &matcher, &mut cache).await;
            summary.failures += outcome.failures;
            if !outcome.applied.is_empty() {
                summary.messages_labeled += 1;
                summary.labels_applied += outcome.applied.len();
            }
        }

        info!(
            seen = summary.messages_seen,
            labeled = summary.messages_labeled,
            applied = summary.labels_applied,
            failures = summary.failures,
            "Labeling pass complete"
        );
        Ok(summary)
    }

    /// Apply every matching label to `message` and remove it from the inbox.
    ///
    /// A label that cannot be resolved or applied is skipped; the
    /// remaining labels are still attempted.
    pub async fn label_message(
        &self,
        message: &MailMessage,
        matcher: &KeywordMatcher<'_>,
        cache: &mut LabelCache,
    ) -> MessageOutcome {
        let mut outcome = MessageOutcome::default();
        let text = decode_message(message);
        let matches = matcher.evaluate(&text);
        if matches.is_empty() {
            debug!(id = %message.id, "No keyword matched");
            return outcome;
        }

        let remove = [INBOX_LABEL.to_string()];
        for hit in matches {
            let label_id = match self.resolve_label(hit.label, cache).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(label = hit.label, error = %e, "Could not ensure label, skipping");
                    outcome.failures += 1;
                    continue;
                }
            };

            match self
                .source
                .modify_labels(&message.id, &[label_id], &remove)
                .await
            {
                Ok(()) => {
                    info!(
                        id = %message.id,
                        subject = message.subject().unwrap_or_default(),
                        label = hit.label,
                        keyword = hit.keyword,
                        "Labeled message"
                    );
                    outcome.applied.push(hit.label.to_string());
                }
                Err(e) => {
                    error!(id = %message.id, label = hit.label, error = %e, "Failed to apply label");
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }

    async fn resolve_label(
        &self,
        name: &str,
        cache: &mut LabelCache,
    ) -> Result<String, ProviderError> {
        if let Some(id) = cache.get(name) {
            return Ok(id.to_string());
        }
        let id = ensure_label(self.source.as_ref(), name).await?;
        cache.insert(name, id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::fake::{FakeMailSource, Modification};

    fn mapping(entries: &[(&str, &[&str])]) -> KeywordMapping {
        entries
            .iter()
            .map(|(label, keywords)| (label.to_string(), keywords.to_vec()))
            .collect()
    }

    fn labeler(source: &Arc<FakeMailSource>) -> Labeler {
        Labeler::new(Arc::clone(source) as Arc<dyn MailSource>)
    }

    #[tokio::test]
    async fn facebook_message_is_labeled_social() {
        let source = Arc::new(
            FakeMailSource::new(10)
                .with_label("INBOX", "INBOX")
                .with_text_message("m1", "check out my facebook page"),
        );
        let summary = labeler(&source)
            .run(&mapping(&[("Social", &["facebook"])]))
            .await
            .unwrap();

        assert_eq!(
            summary,
            PassSummary {
                messages_seen: 1,
                messages_labeled: 1,
                labels_applied: 1,
                failures: 0,
            }
        );
        let social = source
            .labels()
            .into_iter()
            .find(|l| l.name == "Social")
            .unwrap();
        assert_eq!(
            source.modifications(),
            vec![Modification {
                id: "m1".into(),
                add: vec![social.id],
                remove: vec!["INBOX".into()],
            }]
        );
    }

    #[tokio::test]
    async fn two_matching_labels_are_both_applied() {
        let source = Arc::new(
            FakeMailSource::new(10).with_text_message("m1", "Facebook SALE, unsubscribe below"),
        );
        let summary = labeler(&source)
            .run(&mapping(&[
                ("Social", &["facebook"]),
                ("Promotions", &["unsubscribe"]),
            ]))
            .await
            .unwrap();

        assert_eq!(summary.messages_labeled, 1);
        assert_eq!(summary.labels_applied, 2);
        assert_eq!(source.modifications().len(), 2);
        assert_eq!(source.create_calls(), 2);
    }

    #[tokio::test]
    async fn failed_label_creation_skips_only_that_label() {
        let source = Arc::new(
            FakeMailSource::new(10)
                .with_text_message("m1", "facebook sale")
                .failing_create("Social"),
        );
        let summary = labeler(&source)
            .run(&mapping(&[("Social", &["facebook"]), ("Promotions", &["sale"])]))
            .await
            .unwrap();

        assert_eq!(summary.labels_applied, 1);
        assert_eq!(summary.failures, 1);
        let mods = source.modifications();
        assert_eq!(mods.len(), 1);
        let promotions = source
            .labels()
            .into_iter()
            .find(|l| l.name == "Promotions")
            .unwrap();
        assert_eq!(mods[0].add, vec![promotions.id]);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_stop_the_pass() {
        let source = Arc::new(
            FakeMailSource::new(10)
                .with_text_message("m1", "facebook")
                .with_text_message("m2", "facebook")
                .with_text_message("m3", "facebook")
                .failing_message("m2"),
        );
        let summary = labeler(&source)
            .run(&mapping(&[("Social", &["facebook"])]))
            .await
            .unwrap();

        assert_eq!(summary.messages_seen, 3);
        assert_eq!(summary.messages_labeled, 2);
        assert_eq!(summary.failures, 1);
        let ids: Vec<String> = source.modifications().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[tokio::test]
    async fn every_page_is_processed_and_label_created_once() {
        let mut source = FakeMailSource::new(2);
        for i in 1..=5 {
            source = source.with_text_message(&format!("m{i}"), "weekly newsletter");
        }
        let source = Arc::new(source);
        let summary = labeler(&source)
            .run(&mapping(&[("News", &["newsletter"])]))
            .await
            .unwrap();

        assert_eq!(summary.messages_seen, 5);
        assert_eq!(summary.labels_applied, 5);
        assert_eq!(source.list_calls(), 3);
        assert_eq!(source.create_calls(), 1);
    }

    #[tokio::test]
    async fn existing_label_is_reused() {
        let source = Arc::new(
            FakeMailSource::new(10)
                .with_label("Label_42", "social")
                .with_text_message("m1", "facebook"),
        );
        labeler(&source)
            .run(&mapping(&[("Social", &["facebook"])]))
            .await
            .unwrap();

        assert_eq!(source.create_calls(), 0);
        assert_eq!(source.modifications()[0].add, vec!["Label_42".to_string()]);
    }

    #[tokio::test]
    async fn unmatched_message_is_untouched() {
        let source = Arc::new(FakeMailSource::new(10).with_text_message("m1", "hello there"));
        let summary = labeler(&source)
            .run(&mapping(&[("Social", &["facebook"])]))
            .await
            .unwrap();

        assert_eq!(summary.messages_seen, 1);
        assert_eq!(summary.messages_labeled, 0);
        assert!(source.modifications().is_empty());
        assert_eq!(source.create_calls(), 0);
    }

    #[tokio::test]
    async fn empty_mapping_skips_listing() {
        let source = Arc::new(FakeMailSource::new(10).with_text_message("m1", "facebook"));
        let summary = labeler(&source).run(&KeywordMapping::new()).await.unwrap();

        assert_eq!(summary, PassSummary::default());
        assert_eq!(source.list_calls(), 0);
    }

    #[tokio::test]
    async fn label_message_uses_cache() {
        let source = Arc::new(FakeMailSource::new(10));
        let labeler = labeler(&source);
        let mapping = mapping(&[("Social", &["facebook"])]);
        let matcher = KeywordMatcher::new(&mapping);
        let mut cache = LabelCache::new();
        cache.insert("SOCIAL", "Label_cached".into());

        let message = MailMessage {
            id: "m9".into(),
            raw_body: base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE,
                "facebook",
            ),
            ..Default::default()
        };
        let outcome = labeler.label_message(&message, &matcher, &mut cache).await;

        assert_eq!(outcome.applied, vec!["Social".to_string()]);
        assert_eq!(source.create_calls(), 0);
        assert_eq!(source.modifications()[0].add, vec!["Label_cached".to_string()]);
    }
}
