//! Mail provider abstraction.
//!
//! The labeler only needs five capabilities from a provider: list and
//! create labels, page through message ids, fetch one message and change
//! a message's labels. [`GmailClient`] implements them against the Gmail
//! REST API.

pub mod auth;
#[cfg(test)]
pub(crate) mod fake;
pub mod gmail;

pub use auth::{Authenticator, ClientSecrets, Session, Token};
pub use gmail::GmailClient;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ProviderError;

/// System label for the inbox view.
pub const INBOX_LABEL: &str = "INBOX";

/// A provider-side label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailLabel {
    pub id: String,
    pub name: String,
}

/// A message id as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: Option<String>,
}

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

/// A fetched message. Bodies are still transport-encoded.
#[derive(Debug, Clone, Default)]
pub struct MailMessage {
    pub id: String,
    pub headers: Vec<(String, String)>,
    /// Top-level body data.
    pub raw_body: String,
    /// Body data of nested `text/*` MIME parts, in document order.
    pub part_bodies: Vec<String>,
}

impl MailMessage {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }
}

/// Capabilities consumed from the mail provider.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<MailLabel>, ProviderError>;

    /// Create a label with the given display name.
    async fn create_label(&self, name: &str) -> Result<MailLabel, ProviderError>;

    /// Fetch one page of the default message listing.
    async fn list_messages(&self, page_token: Option<&str>) -> Result<MessagePage, ProviderError>;

    async fn get_message(&self, id: &str) -> Result<MailMessage, ProviderError>;

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), ProviderError>;
}

/// Return the id of the label called `name` (case-insensitive), creating
/// it if no such label exists yet.
pub async fn ensure_label(source: &dyn MailSource, name: &str) -> Result<String, ProviderError> {
    let existing = source.list_labels().await?;
    if let Some(label) = existing
        .iter()
        .find(|l| l.name.to_lowercase() == name.to_lowercase())
    {
        debug!(label = %name, id = %label.id, "Label already exists");
        return Ok(label.id.clone());
    }

    let created = source.create_label(name).await?;
    info!(label = %name, id = %created.id, "Label created");
    Ok(created.id)
}

/// Follow continuation tokens until the listing is exhausted.
pub async fn collect_message_refs(
    source: &dyn MailSource,
) -> Result<Vec<MessageRef>, ProviderError> {
    let mut page = source.list_messages(None).await?;
    let mut refs = std::mem::take(&mut page.messages);

    while let Some(token) = page.next_page_token.take() {
        debug!(page_token = %token, collected = refs.len(), "Fetching next message page");
        page = source.list_messages(Some(&token)).await?;
        refs.append(&mut page.messages);
    }

    Ok(refs)
}
