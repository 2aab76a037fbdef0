//! Builds the per-pass keyword snapshot from the rule store.

use tracing::{error, info};

use crate::rules::model::KeywordMapping;
use crate::rules::store::RuleStore;

/// Load every usable rule into a [`KeywordMapping`].
///
/// Rules without a label or without keywords are skipped. A store failure
/// is logged and yields an empty mapping, so the pass labels nothing
/// instead of aborting.
pub async fn load_mapping(store: &RuleStore) -> KeywordMapping {
    let rules = match store.list().await {
        Ok(rules) => rules,
        Err(e) => {
            error!(error = %e, "Failed to load rules from database");
            return KeywordMapping::new();
        }
    };

    let mut mapping = KeywordMapping::new();
    for rule in rules {
        if rule.label.is_empty() || rule.keywords.is_empty() {
            continue;
        }
        mapping.insert(rule.label, rule.keywords);
    }

    info!(labels = mapping.len(), "Loaded rules from database");
    mapping
}
