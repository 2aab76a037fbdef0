//! Error types for the mail labeler.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Mail provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Rule store errors, surfaced to API callers as 4xx responses.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule not found: {label}")]
    NotFound { label: String },

    #[error("No rule contains keyword: {keyword}")]
    KeywordNotFound { keyword: String },

    #[error("Rule {label} conflicts with an existing rule: {reason}")]
    Conflict { label: String, reason: String },

    #[error("Invalid rule: {0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RuleError {
    /// True for the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::KeywordNotFound { .. })
    }
}

/// OAuth session errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token expired and no refresh token is available")]
    NoRefreshToken,

    #[error("Token endpoint rejected the request: {error} - {description}")]
    OAuth { error: String, description: String },

    #[error("Invalid client secrets: {0}")]
    InvalidSecrets(String),

    #[error("Authorization flow failed: {0}")]
    Flow(String),

    #[error("State mismatch in authorization redirect")]
    StateMismatch,

    #[error("User denied authorization: {0}")]
    AccessDenied(String),

    #[error("Access token rejected by provider")]
    TokenRejected,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the mail provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Label {name} could not be created: {reason}")]
    LabelUnavailable { name: String, reason: String },

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl ProviderError {
    /// True when the stored credentials are unusable and only a fresh
    /// interactive authorization can recover.
    pub fn needs_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::TokenRejected | AuthError::NoRefreshToken | AuthError::OAuth { .. })
        )
    }
}

/// Body decoding failures. Never escapes the decoder; each stage degrades
/// to a best-effort result instead.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid base64 input: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Malformed quoted-printable escape at byte {offset}")]
    QuotedPrintable { offset: usize },
}

/// Result type alias for the labeler.
pub type Result<T> = std::result::Result<T, Error>;
