//! Gmail REST API v1 client implementing [`MailSource`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::{Authenticator, Session};
use super::{MailLabel, MailMessage, MailSource, MessagePage, MessageRef};
use crate::config::DEFAULT_GMAIL_API_BASE;
use crate::error::{AuthError, ProviderError};

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct WireLabel {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewLabel<'a> {
    name: &'a str,
    label_list_visibility: &'a str,
    message_list_visibility: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<WireMessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessageRef {
    id: String,
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    #[serde(default)]
    payload: Option<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<WireHeader>,
    #[serde(default)]
    body: Option<WireBody>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireBody {
    data: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    add_label_ids: &'a [String],
    remove_label_ids: &'a [String],
}

impl WirePart {
    fn data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }

    /// Collect body data of nested `text/*` parts, depth first.
    fn collect_text_parts(&self, out: &mut Vec<String>) {
        for part in &self.parts {
            if part.mime_type.starts_with("text/") {
                if let Some(data) = part.data() {
                    out.push(data.to_string());
                }
            }
            part.collect_text_parts(out);
        }
    }
}

impl From<WireMessage> for MailMessage {
    fn from(wire: WireMessage) -> Self {
        let payload = wire.payload.unwrap_or_default();
        let mut part_bodies = Vec::new();
        payload.collect_text_parts(&mut part_bodies);

        Self {
            id: wire.id,
            raw_body: payload.data().unwrap_or_default().to_string(),
            headers: payload
                .headers
                .into_iter()
                .map(|h| (h.name, h.value))
                .collect(),
            part_bodies,
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Gmail client bound to one user and one OAuth session.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    session: Mutex<Session>,
    authenticator: Option<Arc<Authenticator>>,
}

impl GmailClient {
    pub fn new(session: Session, user: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_GMAIL_API_BASE, session, user)
    }

    /// Client against a custom API root (e.g. a local mock server).
    pub fn with_base_url(
        base_url: impl Into<String>,
        session: Session,
        user: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            session: Mutex::new(session),
            authenticator: None,
        }
    }

    /// Refresh the session through `authenticator` whenever it expires.
    pub fn with_authenticator(mut self, authenticator: Arc<Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// `{base}/gmail/v1/users/{user}/{segments..}`, each segment
    /// percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let invalid = |reason: String| ProviderError::RequestFailed {
            endpoint: self.base_url.clone(),
            reason,
        };
        let mut url =
            Url::parse(&self.base_url).map_err(|e| invalid(format!("invalid API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| invalid("API base cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["gmail", "v1", "users", self.user.as_str()])
            .extend(segments);
        Ok(url)
    }

    /// Current access token, refreshing the session first if it expired.
    async fn bearer(&self) -> Result<String, ProviderError> {
        let mut session = self.session.lock().await;
        if session.is_expired() {
            if let Some(auth) = &self.authenticator {
                *session = auth.refresh(&session).await?;
                info!("Gmail session refreshed");
            }
        }
        Ok(session.access_token().to_string())
    }

    /// Replace the session even though it has not expired locally, after
    /// the provider rejected its access token.
    async fn force_refresh(&self, auth: &Authenticator) -> Result<(), ProviderError> {
        let mut session = self.session.lock().await;
        *session = auth.refresh(&session).await?;
        info!("Gmail session refreshed after token rejection");
        Ok(())
    }

    async fn dispatch(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ProviderError> {
        let token = self.bearer().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    /// Send with the current token. A 401 refreshes the session once and
    /// retries when an authenticator is attached.
    async fn send(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ProviderError> {
        let retry = self
            .authenticator
            .as_ref()
            .and_then(|auth| request.try_clone().map(|retry| (auth, retry)));

        let mut response = self.dispatch(endpoint, request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let Some((auth, retry)) = retry else {
                return Err(AuthError::TokenRejected.into());
            };
            warn!(endpoint, "Access token rejected, refreshing session");
            self.force_refresh(auth).await?;
            response = self.dispatch(endpoint, retry).await?;
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::TokenRejected.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        self.send(endpoint, request)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list_labels(&self) -> Result<Vec<MailLabel>, ProviderError> {
        let list: LabelList = self
            .send_json("labels.list", self.http.get(self.url(&["labels"])?))
            .await?;
        Ok(list
            .labels
            .into_iter()
            .map(|l| MailLabel {
                id: l.id,
                name: l.name,
            })
            .collect())
    }

    async fn create_label(&self, name: &str) -> Result<MailLabel, ProviderError> {
        let body = NewLabel {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };
        let label: WireLabel = self
            .send_json("labels.create", self.http.post(self.url(&["labels"])?).json(&body))
            .await
            .map_err(|e| match e {
                ProviderError::Status { status, body, .. } => ProviderError::LabelUnavailable {
                    name: name.to_string(),
                    reason: format!("HTTP {status}: {body}"),
                },
                other => other,
            })?;
        Ok(MailLabel {
            id: label.id,
            name: label.name,
        })
    }

    async fn list_messages(&self, page_token: Option<&str>) -> Result<MessagePage, ProviderError> {
        let mut request = self.http.get(self.url(&["messages"])?);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        let list: MessageList = self.send_json("messages.list", request).await?;
        debug!(
            count = list.messages.len(),
            has_next = list.next_page_token.is_some(),
            "Listed message page"
        );

        Ok(MessagePage {
            messages: list
                .messages
                .into_iter()
                .map(|m| MessageRef {
                    id: m.id,
                    thread_id: m.thread_id,
                })
                .collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, ProviderError> {
        let wire: WireMessage = self
            .send_json(
                "messages.get",
                self.http.get(self.url(&["messages", id])?),
            )
            .await?;
        Ok(wire.into())
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), ProviderError> {
        let body = ModifyRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };
        self.send(
            "messages.modify",
            self.http
                .post(self.url(&["messages", id, "modify"])?)
                .json(&body),
        )
        .await?;
        debug!(message_id = id, added = ?add, removed = ?remove, "Message labels modified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::mail::auth::{ClientSecrets, Token};

    fn session(access: &str) -> Session {
        Session::new(Token {
            access_token: access.into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            scope: None,
        })
    }

    fn refreshable_session(access: &str) -> Session {
        Session::new(Token {
            access_token: access.into(),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            scope: None,
        })
    }

    fn authenticator(server: &MockServer, dir: &tempfile::TempDir) -> Arc<Authenticator> {
        let secrets = ClientSecrets {
            client_id: "client-123".into(),
            client_secret: secrecy::SecretString::from("shh"),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".into(),
            token_uri: format!("{}/token", server.uri()),
        };
        Arc::new(Authenticator::new(secrets, dir.path().join("token.json")))
    }

    fn client(server: &MockServer) -> GmailClient {
        GmailClient::with_base_url(server.uri(), session("test-token"), "me")
    }

    #[tokio::test]
    async fn lists_labels_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "labels": [
                    {"id": "INBOX", "name": "INBOX", "type": "system"},
                    {"id": "Label_1", "name": "Social", "type": "user"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let labels = client(&server).list_labels().await.unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1].name, "Social");
    }

    #[tokio::test]
    async fn creates_visible_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/labels"))
            .and(body_json(serde_json::json!({
                "name": "Promotions",
                "labelListVisibility": "labelShow",
                "messageListVisibility": "show"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "Label_9", "name": "Promotions"})),
            )
            .mount(&server)
            .await;

        let label = client(&server).create_label("Promotions").await.unwrap();
        assert_eq!(label.id, "Label_9");
    }

    #[tokio::test]
    async fn label_conflict_maps_to_label_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(409).set_body_string("Label name exists"))
            .mount(&server)
            .await;

        let err = client(&server).create_label("Social").await.unwrap_err();
        assert!(matches!(err, ProviderError::LabelUnavailable { ref name, .. } if name == "Social"));
    }

    #[tokio::test]
    async fn list_messages_passes_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m3", "threadId": "t3"}],
                "resultSizeEstimate": 1
            })))
            .mount(&server)
            .await;

        let page = client(&server)
            .list_messages(Some("page-2"))
            .await
            .unwrap();
        assert_eq!(page.messages[0].id, "m3");
        assert_eq!(page.messages[0].thread_id.as_deref(), Some("t3"));
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn empty_mailbox_listing_has_no_messages_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"resultSizeEstimate": 0})),
            )
            .mount(&server)
            .await;

        let page = client(&server).list_messages(None).await.unwrap();
        assert!(page.messages.is_empty());
    }

    #[tokio::test]
    async fn get_message_collects_body_and_text_parts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "threadId": "t1",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [{"name": "Subject", "value": "Hi"}],
                    "body": {"size": 0},
                    "parts": [
                        {"mimeType": "text/plain", "body": {"data": "aGVsbG8"}},
                        {"mimeType": "image/png", "body": {"attachmentId": "a1"}},
                        {"mimeType": "multipart/related", "body": {"size": 0}, "parts": [
                            {"mimeType": "text/html", "body": {"data": "PGI-aGk8L2I-"}}
                        ]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let msg = client(&server).get_message("m1").await.unwrap();
        assert_eq!(msg.subject(), Some("Hi"));
        assert_eq!(msg.raw_body, "");
        assert_eq!(msg.part_bodies, vec!["aGVsbG8", "PGI-aGk8L2I-"]);
    }

    #[tokio::test]
    async fn modify_sends_add_and_remove() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/m1/modify"))
            .and(body_json(serde_json::json!({
                "addLabelIds": ["Label_1"],
                "removeLabelIds": ["INBOX"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .modify_labels("m1", &["Label_1".into()], &["INBOX".into()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).list_labels().await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(AuthError::TokenRejected)));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/bad"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server).get_message("bad").await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_request_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .and(header("Authorization", "Bearer revoked"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .and(header("Authorization", "Bearer renewed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "labels": [{"id": "Label_1", "name": "Social"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&server, &dir);
        let client = GmailClient::with_base_url(server.uri(), refreshable_session("revoked"), "me")
            .with_authenticator(Arc::clone(&auth));

        let labels = client.list_labels().await.unwrap();
        assert_eq!(labels[0].id, "Label_1");
        assert_eq!(auth.load_cached().unwrap().unwrap().access_token, "renewed");
    }

    #[tokio::test]
    async fn token_rejected_again_after_refresh_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "still-bad",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = GmailClient::with_base_url(server.uri(), refreshable_session("revoked"), "me")
            .with_authenticator(authenticator(&server, &dir));

        let err = client.list_labels().await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(AuthError::TokenRejected)));
        assert!(err.needs_reauthorization());
    }

    #[tokio::test]
    async fn rejected_token_without_refresh_token_needs_reauthorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = GmailClient::with_base_url(server.uri(), session("revoked"), "me")
            .with_authenticator(authenticator(&server, &dir));

        let err = client.list_labels().await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(AuthError::NoRefreshToken)));
        assert!(err.needs_reauthorization());
    }

    #[test]
    fn url_segments_are_percent_encoded() {
        let client = GmailClient::with_base_url("http://127.0.0.1:9/", session("t"), "john doe");
        let url = client.url(&["messages", "a/b c?d", "modify"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9/gmail/v1/users/john%20doe/messages/a%2Fb%20c%3Fd/modify"
        );
    }

    #[test]
    fn url_keeps_base_path_prefix() {
        let client = GmailClient::with_base_url("http://127.0.0.1:9/proxy", session("t"), "me");
        let url = client.url(&["labels"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/proxy/gmail/v1/users/me/labels");
    }
}
