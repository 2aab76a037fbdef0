//! In-memory `MailSource` for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

use super::{MailLabel, MailMessage, MailSource, MessagePage, MessageRef};
use crate::error::ProviderError;

/// A recorded `modify_labels` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub id: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Default)]
struct State {
    labels: Vec<MailLabel>,
    messages: Vec<MailMessage>,
    modifications: Vec<Modification>,
    list_calls: usize,
    create_calls: usize,
    failing_creates: HashSet<String>,
    failing_messages: HashSet<String>,
}

pub struct FakeMailSource {
    page_size: usize,
    state: Mutex<State>,
}

impl FakeMailSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_label(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().labels.push(MailLabel {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    /// Add a message whose plain-text body is base64url-encoded.
    pub fn with_text_message(self, id: &str, body: &str) -> Self {
        self.state.lock().unwrap().messages.push(MailMessage {
            id: id.into(),
            headers: vec![("Subject".into(), format!("message {id}"))],
            raw_body: URL_SAFE.encode(body),
            part_bodies: Vec::new(),
        });
        self
    }

    pub fn failing_create(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_creates
            .insert(name.to_lowercase());
        self
    }

    pub fn failing_message(self, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_messages
            .insert(id.to_string());
        self
    }

    pub fn labels(&self) -> Vec<MailLabel> {
        self.state.lock().unwrap().labels.clone()
    }

    pub fn modifications(&self) -> Vec<Modification> {
        self.state.lock().unwrap().modifications.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn list_labels(&self) -> Result<Vec<MailLabel>, ProviderError> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<MailLabel, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.failing_creates.contains(&name.to_lowercase()) {
            return Err(ProviderError::LabelUnavailable {
                name: name.into(),
                reason: "quota exceeded".into(),
            });
        }
        let label = MailLabel {
            id: format!("Label_{}", state.labels.len() + 1),
            name: name.into(),
        };
        state.labels.push(label.clone());
        Ok(label)
    }

    async fn list_messages(&self, page_token: Option<&str>) -> Result<MessagePage, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(state.messages.len());
        let messages = state.messages[start..end]
            .iter()
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: None,
            })
            .collect();
        Ok(MessagePage {
            messages,
            next_page_token: (end < state.messages.len()).then(|| end.to_string()),
        })
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.failing_messages.contains(id) {
            return Err(ProviderError::Status {
                endpoint: format!("messages/{id}"),
                status: 500,
                body: "backend error".into(),
            });
        }
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                endpoint: format!("messages/{id}"),
                status: 404,
                body: "not found".into(),
            })
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), ProviderError> {
        self.state.lock().unwrap().modifications.push(Modification {
            id: id.into(),
            add: add.to_vec(),
            remove: remove.to_vec(),
        });
        Ok(())
    }
}
