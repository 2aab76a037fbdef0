//! Runtime configuration, built from environment variables.

use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_DB_PATH: &str = "./data/mail-labeler.db";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CREDENTIALS_PATH: &str = "gmail-credentials.json";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";
pub const DEFAULT_GMAIL_USER: &str = "me";
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// libSQL database file holding the rules.
    pub db_path: PathBuf,
    /// Port for the rule management API.
    pub port: u16,
    /// OAuth client secrets downloaded from the Google console.
    pub credentials_path: PathBuf,
    /// Cached access/refresh token, written after the first authorization.
    pub token_path: PathBuf,
    /// Gmail user id; `me` is the authorized account.
    pub gmail_user: String,
    /// Gmail REST API base URL.
    pub gmail_api_base: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            port: DEFAULT_PORT,
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            gmail_user: DEFAULT_GMAIL_USER.to_string(),
            gmail_api_base: DEFAULT_GMAIL_API_BASE.to_string(),
        }
    }
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("LABELER_PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "LABELER_PORT".into(),
                message: format!("{raw:?} is not a port number: {e}"),
            })?,
            None => defaults.port,
        };

        Ok(Self {
            db_path: lookup("LABELER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            port,
            credentials_path: lookup("GMAIL_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.credentials_path),
            token_path: lookup("GMAIL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.token_path),
            gmail_user: lookup("GMAIL_USER")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.gmail_user),
            gmail_api_base: lookup("GMAIL_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gmail_api_base),
        })
    }
}
