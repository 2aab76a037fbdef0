//! Bulk import of rules from a JSON keyword file.
//!
//! The file maps labels to keyword lists:
//!
//! ```json
//! { "Promotions": ["unsubscribe", "sale"], "Social": ["facebook"] }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{ConfigError, Error};
use crate::rules::store::{CreateOutcome, RuleStore};

/// Counts from one import run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub merged: usize,
    pub failed: usize,
}

/// Parse a keyword file body.
pub fn parse_keyword_file(
    path: &str,
    body: &str,
) -> Result<BTreeMap<String, Vec<String>>, ConfigError> {
    serde_json::from_str(body).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Read a keyword file and create (or merge) one rule per entry.
///
/// Individual rule failures are logged and counted; only an unreadable or
/// malformed file fails the whole import.
pub async fn import_file(store: &RuleStore, path: &Path) -> Result<ImportSummary, Error> {
    let shown = path.display().to_string();
    let body = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: shown.clone(),
            source,
        })?;
    let entries = parse_keyword_file(&shown, &body)?;

    let mut summary = ImportSummary::default();
    for (label, keywords) in &entries {
        match store.create(label, keywords).await {
            Ok((_, CreateOutcome::Created)) => summary.created += 1,
            Ok((_, CreateOutcome::Merged)) => summary.merged += 1,
            Err(e) => {
                warn!(label = %label, error = %e, "Skipping rule from keyword file");
                summary.failed += 1;
            }
        }
    }

    info!(
        path = %shown,
        created = summary.created,
        merged = summary.merged,
        failed = summary.failed,
        "Keyword file imported"
    );
    Ok(summary)
}
