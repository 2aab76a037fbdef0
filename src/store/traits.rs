//! `Database` trait — async persistence interface for rules.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::rules::model::Rule;

/// Backend-agnostic rule persistence.
///
/// Implementations store labels exactly as given; normalization and
/// keyword merging live in [`crate::rules::RuleStore`].
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// All rules in insertion order.
    async fn list_rules(&self) -> Result<Vec<Rule>, DatabaseError>;

    /// Look up a rule by its stored label.
    async fn get_rule_by_label(&self, label: &str) -> Result<Option<Rule>, DatabaseError>;

    /// Insert a new rule. A duplicate label yields `DatabaseError::Constraint`.
    async fn insert_rule(&self, label: &str, keywords: &[String]) -> Result<Rule, DatabaseError>;

    /// Replace a rule's keyword list.
    async fn update_rule_keywords(&self, id: &str, keywords: &[String])
    -> Result<(), DatabaseError>;

    /// Delete a rule by id. Returns false if nothing was deleted.
    async fn delete_rule(&self, id: &str) -> Result<bool, DatabaseError>;
}
