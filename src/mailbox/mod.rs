//! Mailbox provider capability.
//!
//! `MailSearchClient` is the only way the rest of the crate talks to the
//! provider. `GmailClient` is the production implementation; tests substitute
//! in-memory fakes.

mod gmail;

pub use gmail::GmailClient;

use crate::error::MailResult;
use crate::oauth::AuthorizedClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw message header (name-value pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub snippet: String,
    pub headers: Vec<Header>,
}

impl MessageRef {
    /// First header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// An attachment of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub attachment_id: String,
    pub mime_type: String,
    pub filename: String,
}

/// Operations the service needs from the mailbox provider.
///
/// Every method is a remote call. `Unauthorized` signals that the provider
/// rejected the client's token.
#[async_trait]
pub trait MailSearchClient: Send + Sync {
    /// Run a provider-side keyword search. Result order is the provider's.
    async fn search(&self, client: &AuthorizedClient, query: &str) -> MailResult<Vec<MessageRef>>;

    async fn fetch_attachments(
        &self,
        client: &AuthorizedClient,
        message_id: &str,
    ) -> MailResult<Vec<AttachmentRef>>;

    /// Decoded attachment content. Missing attachments are `NotFound`.
    async fn fetch_attachment_bytes(
        &self,
        client: &AuthorizedClient,
        message_id: &str,
        attachment_id: &str,
    ) -> MailResult<Vec<u8>>;
}
