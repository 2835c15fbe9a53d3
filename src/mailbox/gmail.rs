use super::{AttachmentRef, Header, MailSearchClient, MessageRef};
use crate::config::ProviderConfig;
use crate::error::{MailError, MailResult};
use crate::oauth::AuthorizedClient;
use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Attachment payloads are base64url; padding may or may not be present.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Response from listing messages
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    messages: Option<Vec<MessageId>>,
}

#[derive(Debug, Deserialize)]
struct MessageId {
    id: String,
}

/// Message from the Gmail API (`metadata` or `full` format)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

/// One node of the MIME part tree
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    headers: Option<Vec<Header>>,
    #[serde(default)]
    body: Option<MessagePartBody>,
    #[serde(default)]
    parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePartBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

/// HTTP client for the Gmail REST API.
pub struct GmailClient {
    http_client: Client,
    base_url: String,
    max_results: u32,
    max_concurrency: usize,
}

impl GmailClient {
    pub fn new(base_url: String, timeout: Duration) -> MailResult<Self> {
        let http_client = Client::builder()
            .user_agent("mailsearch/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Provider(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_results: 100,
            max_concurrency: 10,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> MailResult<Self> {
        Ok(Self::new(config.api_base_url.clone(), config.request_timeout())?
            .with_max_results(config.max_results))
    }

    /// Maximum hits requested per search (the API caps this at 500)
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(1, 500);
        self
    }

    /// Bound on concurrent metadata lookups during a search
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    async fn get_message(
        &self,
        client: &AuthorizedClient,
        message_id: &str,
        format_query: &str,
    ) -> MailResult<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?{}",
            self.base_url,
            urlencoding::encode(message_id),
            format_query
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(client.access_token())
            .send()
            .await?;

        let response = check_response_status(response, &format!("message {}", message_id)).await?;
        response
            .json::<GmailMessage>()
            .await
            .map_err(|e| MailError::Provider(format!("Failed to parse message {}: {}", message_id, e)))
    }

    /// Metadata for one hit; `None` when the message vanished after listing.
    async fn fetch_metadata(
        &self,
        client: &AuthorizedClient,
        message_id: String,
    ) -> MailResult<Option<MessageRef>> {
        let message = match self
            .get_message(
                client,
                &message_id,
                "format=metadata&metadataHeaders=From&metadataHeaders=Subject&metadataHeaders=Date",
            )
            .await
        {
            Ok(message) => message,
            Err(MailError::NotFound(_)) => {
                warn!(message_id = %message_id, "Search hit no longer exists, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(Some(MessageRef {
            id: message.id,
            snippet: message.snippet.unwrap_or_default(),
            headers: message
                .payload
                .and_then(|p| p.headers)
                .unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl MailSearchClient for GmailClient {
    async fn search(&self, client: &AuthorizedClient, query: &str) -> MailResult<Vec<MessageRef>> {
        let url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            self.base_url,
            urlencoding::encode(query),
            self.max_results
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(client.access_token())
            .send()
            .await?;

        let response = check_response_status(response, "message search").await?;
        let list: ListMessagesResponse = response
            .json()
            .await
            .map_err(|e| MailError::Provider(format!("Failed to parse search response: {}", e)))?;

        let ids: Vec<String> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect();
        debug!(hits = ids.len(), "Search returned message ids");

        let mut indexed: Vec<(usize, Option<MessageRef>)> =
            futures::stream::iter(ids.into_iter().enumerate())
                .map(|(index, id)| async move {
                    self.fetch_metadata(client, id).await.map(|m| (index, m))
                })
                .buffer_unordered(self.max_concurrency)
                .try_collect()
                .await?;

        indexed.sort_unstable_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().filter_map(|(_, m)| m).collect())
    }

    async fn fetch_attachments(
        &self,
        client: &AuthorizedClient,
        message_id: &str,
    ) -> MailResult<Vec<AttachmentRef>> {
        let message = self.get_message(client, message_id, "format=full").await?;

        let mut attachments = Vec::new();
        if let Some(payload) = &message.payload {
            collect_attachments(payload, &mut attachments);
        }
        Ok(attachments)
    }

    async fn fetch_attachment_bytes(
        &self,
        client: &AuthorizedClient,
        message_id: &str,
        attachment_id: &str,
    ) -> MailResult<Vec<u8>> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.base_url,
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(client.access_token())
            .send()
            .await?;

        let what = format!("attachment {} of message {}", attachment_id, message_id);
        let response = check_response_status(response, &what).await?;
        let body: MessagePartBody = response
            .json()
            .await
            .map_err(|e| MailError::Provider(format!("Failed to parse {}: {}", what, e)))?;

        match body.data.filter(|d| !d.is_empty()) {
            Some(data) => decode_attachment_data(&data),
            None => Err(MailError::NotFound(what)),
        }
    }
}

/// Walk the part tree depth-first, collecting parts that carry a file.
fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentRef>) {
    let filename = part.filename.as_deref().unwrap_or("");
    let attachment_id = part.body.as_ref().and_then(|b| b.attachment_id.as_deref());

    if let Some(attachment_id) = attachment_id.filter(|_| !filename.is_empty()) {
        out.push(AttachmentRef {
            attachment_id: attachment_id.to_string(),
            mime_type: part
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            filename: filename.to_string(),
        });
    }

    for child in part.parts.iter().flatten() {
        collect_attachments(child, out);
    }
}

fn decode_attachment_data(data: &str) -> MailResult<Vec<u8>> {
    URL_SAFE_LENIENT
        .decode(data)
        .or_else(|_| STANDARD_LENIENT.decode(data))
        .map_err(|e| MailError::Provider(format!("Attachment data is not valid base64: {}", e)))
}

/// Map provider status codes onto the error taxonomy.
///
/// - 401 → `Unauthorized` (token expired or revoked)
/// - 404 → `NotFound`
/// - Other non-2xx → `Provider`
async fn check_response_status(response: Response, what: &str) -> MailResult<Response> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(MailError::Unauthorized(format!(
            "{}: token expired or invalid",
            what
        ))),
        StatusCode::NOT_FOUND => Err(MailError::NotFound(what.to_string())),
        s if !s.is_success() => {
            let body = response.text().await.unwrap_or_default();
            Err(MailError::Provider(format!(
                "{} failed with status {}: {}",
                what, s, body
            )))
        }
        _ => Ok(response),
    }
}
