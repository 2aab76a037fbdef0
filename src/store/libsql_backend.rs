//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::rules::model::Rule;
use crate::store::migrations;
use crate::store::traits::Database;

const RULE_COLUMNS: &str = "id, label, keywords, created_at, updated_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a Rule. Column order matches RULE_COLUMNS.
fn row_to_rule(row: &libsql::Row) -> Result<Rule, DatabaseError> {
    let get = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("row parse column {idx}: {e}")))
    };

    let keywords_json = get(2)?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_json)
        .map_err(|e| DatabaseError::Serialization(format!("rule keywords: {e}")))?;

    Ok(Rule {
        id: get(0)?,
        label: get(1)?,
        keywords,
        created_at: parse_datetime(&get(3)?),
        updated_at: parse_datetime(&get(4)?),
    })
}

fn keywords_to_json(keywords: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(keywords)
        .map_err(|e| DatabaseError::Serialization(format!("rule keywords: {e}")))
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn list_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules ORDER BY rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rules: {e}")))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rules: {e}")))?
        {
            match row_to_rule(&row) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(error = %e, "Skipping unreadable rule row"),
            }
        }
        Ok(rules)
    }

    async fn get_rule_by_label(&self, label: &str) -> Result<Option<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE label = ?1"),
                params![label],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule_by_label: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_rule(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rule_by_label: {e}"))),
        }
    }

    async fn insert_rule(&self, label: &str, keywords: &[String]) -> Result<Rule, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let stamp = now.to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO rules (id, label, keywords, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.clone(), label, keywords_to_json(keywords)?, stamp],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!("label '{label}' already exists"))
                } else {
                    DatabaseError::Query(format!("insert_rule: {e}"))
                }
            })?;

        debug!(id = %id, label = label, "Rule inserted into DB");
        Ok(Rule {
            id,
            label: label.to_string(),
            keywords: keywords.to_vec(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_rule_keywords(
        &self,
        id: &str,
        keywords: &[String],
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE rules SET keywords = ?1, updated_at = ?2 WHERE id = ?3",
                params![keywords_to_json(keywords)?, now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule_keywords: {e}")))?;

        debug!(id = id, count = keywords.len(), "Rule keywords updated in DB");
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute("DELETE FROM rules WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule: {e}")))?;

        debug!(id = id, affected = affected, "Rule delete executed");
        Ok(affected > 0)
    }
}
