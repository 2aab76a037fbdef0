//! Rule store — label normalization, keyword merging and uniqueness checks
//! on top of the [`Database`] trait.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DatabaseError, RuleError};
use crate::rules::model::{Rule, dedup_keywords, merge_keywords, normalize_label};
use crate::store::Database;

/// What `create` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Merged,
}

/// Rule CRUD operations. Every call goes straight to the database; nothing
/// is cached, so mutations are visible to the next read.
///
/// Read-merge-write sequences are serialized across clones, so concurrent
/// creates and updates on one label never drop keywords.
#[derive(Clone)]
pub struct RuleStore {
    db: Arc<dyn Database>,
    writes: Arc<Mutex<()>>,
}

impl RuleStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Create a rule, or merge the keywords into the existing rule with the
    /// same normalized label.
    pub async fn create<S: AsRef<str>>(
        &self,
        label: &str,
        keywords: &[S],
    ) -> Result<(Rule, CreateOutcome), RuleError> {
        let label = checked_label(label)?;
        let _guard = self.writes.lock().await;

        if let Some(existing) = self.db.get_rule_by_label(&label).await? {
            let rule = self.merge_into(existing, keywords).await?;
            info!(label = %label, keywords = rule.keywords.len(), "Rule merged");
            return Ok((rule, CreateOutcome::Merged));
        }

        match self.db.insert_rule(&label, &dedup_keywords(keywords)).await {
            Ok(rule) => {
                info!(label = %label, keywords = rule.keywords.len(), "Rule created");
                Ok((rule, CreateOutcome::Created))
            }
            // Another writer inserted the label between the lookup and the insert.
            Err(DatabaseError::Constraint(reason)) => {
                debug!(label = %label, "Label inserted concurrently, merging instead");
                let existing = self
                    .db
                    .get_rule_by_label(&label)
                    .await?
                    .ok_or_else(|| RuleError::Conflict {
                        label: label.clone(),
                        reason,
                    })?;
                let rule = self.merge_into(existing, keywords).await?;
                Ok((rule, CreateOutcome::Merged))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append keywords to an existing rule.
    pub async fn update<S: AsRef<str>>(
        &self,
        label: &str,
        keywords: &[S],
    ) -> Result<Rule, RuleError> {
        let label = checked_label(label)?;
        let _guard = self.writes.lock().await;
        let rule = self
            .db
            .get_rule_by_label(&label)
            .await?
            .ok_or_else(|| RuleError::NotFound {
                label: label.clone(),
            })?;

        let rule = self.merge_into(rule, keywords).await?;
        info!(label = %label, keywords = rule.keywords.len(), "Rule updated");
        Ok(rule)
    }

    async fn merge_into<S: AsRef<str>>(
        &self,
        mut rule: Rule,
        keywords: &[S],
    ) -> Result<Rule, RuleError> {
        if merge_keywords(&mut rule.keywords, keywords) {
            self.db
                .update_rule_keywords(&rule.id, &rule.keywords)
                .await?;
        } else {
            debug!(label = %rule.label, "No new keywords to merge");
        }
        Ok(rule)
    }

    /// Delete the rule with the given label.
    pub async fn delete(&self, label: &str) -> Result<Rule, RuleError> {
        let label = normalize_label(label);
        let _guard = self.writes.lock().await;
        let rule = self
            .db
            .get_rule_by_label(&label)
            .await?
            .ok_or_else(|| RuleError::NotFound {
                label: label.clone(),
            })?;

        if !self.db.delete_rule(&rule.id).await? {
            return Err(RuleError::NotFound { label });
        }
        info!(label = %rule.label, "Rule deleted");
        Ok(rule)
    }

    /// Delete the first rule, in insertion order, that contains `keyword`.
    /// Other rules sharing the keyword are left alone.
    pub async fn delete_by_keyword(&self, keyword: &str) -> Result<Rule, RuleError> {
        let not_found = || RuleError::KeywordNotFound {
            keyword: keyword.to_string(),
        };

        let _guard = self.writes.lock().await;
        let rule = self
            .db
            .list_rules()
            .await?
            .into_iter()
            .find(|rule| rule.contains_keyword(keyword))
            .ok_or_else(not_found)?;

        if !self.db.delete_rule(&rule.id).await? {
            return Err(not_found());
        }
        info!(label = %rule.label, keyword = keyword, "Rule deleted by keyword");
        Ok(rule)
    }

    /// All rules in insertion order.
    pub async fn list(&self) -> Result<Vec<Rule>, RuleError> {
        Ok(self.db.list_rules().await?)
    }
}

fn checked_label(label: &str) -> Result<String, RuleError> {
    let label = normalize_label(label);
    if label.is_empty() {
        return Err(RuleError::Invalid("label must not be empty".into()));
    }
    Ok(label)
}
