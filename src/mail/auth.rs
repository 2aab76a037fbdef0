//! OAuth 2.0 installed-app authorization for the Gmail API.
//!
//! The first run opens a loopback listener, prints the consent URL and
//! waits for the redirect carrying the authorization code. The resulting
//! token is cached on disk; later runs reuse it and refresh it when it
//! expires. Credentials never live in global state: callers hold a
//! [`Session`] and get a new one back from [`Authenticator::refresh`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::AuthError;

/// Scopes needed to read messages, manage labels and modify messages.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.labels",
    "https://www.googleapis.com/auth/gmail.modify",
];

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Seconds of slack before the recorded expiry at which a token counts as
/// expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth client credentials from the Google console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub client_secret: SecretString,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

/// Layout of the downloaded credentials file.
#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse a credentials document with an `installed` or `web` section.
    pub fn from_json(body: &str) -> Result<Self, AuthError> {
        let file: CredentialsFile =
            serde_json::from_str(body).map_err(|e| AuthError::InvalidSecrets(e.to_string()))?;
        file.installed.or(file.web).ok_or_else(|| {
            AuthError::InvalidSecrets("expected an \"installed\" or \"web\" section".into())
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            AuthError::InvalidSecrets(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&body)
    }
}

/// Cached OAuth token, as stored in the token file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Token {
    /// True once the token is within the expiry margin. Tokens without a
    /// recorded expiry never expire locally.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= exp)
    }

    /// Build a token from an endpoint response. Refresh responses usually
    /// omit the refresh token, so the previous one is carried over.
    fn from_response(response: TokenResponse, previous_refresh: Option<&str>) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh.map(String::from)),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            scope: response.scope,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// The credentials currently in use.
#[derive(Debug, Clone)]
pub struct Session {
    token: Token,
}

impl Session {
    pub fn new(token: Token) -> Self {
        Self { token }
    }

    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        self.token.refresh_token.is_some()
    }
}

/// Produces and refreshes [`Session`]s, persisting tokens to `token_path`.
pub struct Authenticator {
    secrets: ClientSecrets,
    token_path: PathBuf,
    http: reqwest::Client,
}

impl Authenticator {
    pub fn new(secrets: ClientSecrets, token_path: impl Into<PathBuf>) -> Self {
        Self {
            secrets,
            token_path: token_path.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Return a usable session: the cached token if still valid, a
    /// refreshed one if it expired, otherwise a fresh interactive
    /// authorization.
    pub async fn session(&self) -> Result<Session, AuthError> {
        if let Some(token) = self.load_cached()? {
            let session = Session::new(token);
            if !session.is_expired() {
                debug!(path = %self.token_path.display(), "Using cached token");
                return Ok(session);
            }
            if session.can_refresh() {
                match self.refresh(&session).await {
                    Ok(session) => return Ok(session),
                    Err(e) => warn!(error = %e, "Token refresh failed, reauthorizing"),
                }
            }
        }
        self.authorize_interactive().await
    }

    /// Exchange the session's refresh token for a new access token.
    pub async fn refresh(&self, session: &Session) -> Result<Session, AuthError> {
        let refresh_token = session
            .token
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NoRefreshToken)?;

        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.expose_secret()),
            ])
            .await?;

        let token = Token::from_response(response, Some(refresh_token));
        self.save(&token)?;
        info!("Access token refreshed");
        Ok(Session::new(token))
    }

    /// Run the loopback authorization flow and cache the resulting token.
    pub async fn authorize_interactive(&self) -> Result<Session, AuthError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let state = random_state();

        let url = self.authorization_url(&redirect_uri, &state)?;
        eprintln!("Please visit this URL to authorize mail-labeler:\n\n    {url}\n");
        info!(port = port, "Waiting for authorization redirect");

        let code = wait_for_redirect(&listener, &state).await?;
        let token = self.exchange_code(&code, &redirect_uri).await?;
        self.save(&token)?;
        info!(path = %self.token_path.display(), "Authorization complete, token cached");
        Ok(Session::new(token))
    }

    /// Consent URL for the given redirect and CSRF state.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.secrets.auth_uri)
            .map_err(|e| AuthError::InvalidSecrets(format!("auth_uri: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.secrets.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Token, AuthError> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.expose_secret()),
            ])
            .await?;
        Ok(Token::from_response(response, None))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.secrets.token_uri)
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => AuthError::OAuth {
                    error: err.error,
                    description: err.error_description,
                },
                Err(_) => AuthError::OAuth {
                    error: status.as_u16().to_string(),
                    description: body,
                },
            });
        }

        Ok(response.json().await?)
    }

    /// Read the cached token, if any.
    pub fn load_cached(&self) -> Result<Option<Token>, AuthError> {
        let body = match std::fs::read_to_string(&self.token_path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&body) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(path = %self.token_path.display(), error = %e, "Ignoring unreadable token cache");
                Ok(None)
            }
        }
    }

    /// Write the token cache.
    pub fn save(&self, token: &Token) -> Result<(), AuthError> {
        if let Some(parent) = self.token_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body =
            serde_json::to_string_pretty(token).map_err(|e| AuthError::Cache(e.to_string()))?;
        std::fs::write(&self.token_path, body)?;
        Ok(())
    }
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Accept one redirect on the loopback listener and answer the browser.
async fn wait_for_redirect(listener: &TcpListener, expected_state: &str) -> Result<String, AuthError> {
    let (mut stream, peer) = listener.accept().await?;
    debug!(peer = %peer, "Authorization redirect received");

    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let result = parse_redirect(&request, expected_state);

    let body = match &result {
        Ok(_) => "Authorization complete. You may close this window.",
        Err(_) => "Authorization failed. Check the terminal for details.",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Browser went away before the reply was sent");
    }
    result
}

/// Extract the authorization code from the redirect's request line.
pub fn parse_redirect(request: &str, expected_state: &str) -> Result<String, AuthError> {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| AuthError::Flow("malformed redirect request".into()))?;
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| AuthError::Flow(format!("malformed redirect target: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(AuthError::AccessDenied(value.into_owned())),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }
    code.ok_or_else(|| AuthError::Flow("redirect carried no authorization code".into()))
}
