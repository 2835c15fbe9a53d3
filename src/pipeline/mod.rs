//! Search-and-attachment aggregation.
//!
//! One `run` searches the mailbox, then looks up every hit's attachments
//! concurrently and assembles enriched results in search order.

use crate::config::PipelineConfig;
use crate::error::{MailError, MailResult};
use crate::mailbox::{AttachmentRef, MailSearchClient, MessageRef};
use crate::oauth::AuthorizedClient;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// What happens when one message's attachment lookup fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The whole run fails with `AttachmentFetch`
    #[default]
    AllOrNothing,
    /// The message keeps its slot with an error marker and no descriptors
    BestEffort,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" => Ok(FailurePolicy::AllOrNothing),
            "best_effort" => Ok(FailurePolicy::BestEffort),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::AllOrNothing => write!(f, "all_or_nothing"),
            FailurePolicy::BestEffort => write!(f, "best_effort"),
        }
    }
}

/// Where one attachment can be downloaded from, relative to the service origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDescriptor {
    pub mime_type: String,
    pub filename: String,
    pub path: String,
}

/// A search hit with sender and attachment details filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedResult {
    pub id: String,
    pub snippet: String,
    pub sender_name: String,
    pub sender_email: String,
    pub download_descriptors: Vec<DownloadDescriptor>,
    /// Set only under `FailurePolicy::BestEffort`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AggregationPipeline {
    client: Arc<dyn MailSearchClient>,
    max_concurrent_fetches: usize,
    failure_policy: FailurePolicy,
}

impl AggregationPipeline {
    pub fn new(client: Arc<dyn MailSearchClient>, config: &PipelineConfig) -> Self {
        Self {
            client,
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
            failure_policy: config.failure_policy,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Search for `query` and enrich every hit.
    ///
    /// Results come back in the provider's search order. Under
    /// `AllOrNothing` the first failed attachment lookup aborts the run and
    /// cancels the lookups still in flight.
    pub async fn run(
        &self,
        authorized: &AuthorizedClient,
        query: &str,
    ) -> MailResult<Vec<EnrichedResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MailError::InvalidArgument("search query is required".to_string()));
        }

        let messages = self.client.search(authorized, query).await?;
        debug!(hits = messages.len(), "Search completed, fetching attachments");

        // Completion order; the first error drops every lookup still running
        let mut indexed: Vec<(usize, EnrichedResult)> = futures::stream::iter(
            messages.into_iter().enumerate(),
        )
        .map(|(index, message)| async move {
            self.enrich(authorized, message)
                .await
                .map(|result| (index, result))
        })
        .buffer_unordered(self.max_concurrent_fetches)
        .try_collect()
        .await?;

        indexed.sort_unstable_by_key(|(index, _)| *index);
        let results: Vec<EnrichedResult> = indexed.into_iter().map(|(_, r)| r).collect();

        info!(
            results = results.len(),
            policy = %self.failure_policy,
            "Aggregation completed"
        );
        Ok(results)
    }

    async fn enrich(
        &self,
        authorized: &AuthorizedClient,
        message: MessageRef,
    ) -> MailResult<EnrichedResult> {
        let (sender_name, sender_email) = parse_sender(message.header("From").unwrap_or(""));

        let (download_descriptors, error) =
            match self.client.fetch_attachments(authorized, &message.id).await {
                Ok(attachments) => (descriptors_for(&message.id, &attachments), None),
                Err(e) if e.is_unauthorized() => return Err(e),
                Err(e) => match self.failure_policy {
                    FailurePolicy::AllOrNothing => {
                        return Err(MailError::attachment_fetch(&message.id, e))
                    }
                    FailurePolicy::BestEffort => {
                        warn!(message_id = %message.id, error = %e, "Attachment lookup failed");
                        (Vec::new(), Some(e.to_string()))
                    }
                },
            };

        Ok(EnrichedResult {
            id: message.id,
            snippet: message.snippet,
            sender_name,
            sender_email,
            download_descriptors,
            error,
        })
    }
}

fn descriptors_for(message_id: &str, attachments: &[AttachmentRef]) -> Vec<DownloadDescriptor> {
    attachments
        .iter()
        .map(|a| DownloadDescriptor {
            mime_type: a.mime_type.clone(),
            filename: a.filename.clone(),
            path: download_path(message_id, &a.attachment_id, &a.filename),
        })
        .collect()
}

/// Split a raw `From` header into `(name, address)`.
///
/// `"Jane Doe <jane@x.com>"` gives `("Jane Doe", "jane@x.com")`; a header
/// without `<` is all name.
pub fn parse_sender(header: &str) -> (String, String) {
    match header.split_once('<') {
        Some((name, rest)) => {
            let address = rest.trim();
            let address = address.strip_suffix('>').unwrap_or(address);
            (name.trim().to_string(), address.trim().to_string())
        }
        None => (header.trim().to_string(), String::new()),
    }
}

/// Origin-relative download path; only the filename is percent-encoded.
pub fn download_path(message_id: &str, attachment_id: &str, filename: &str) -> String {
    format!(
        "/download/{}/{}/{}",
        message_id,
        attachment_id,
        urlencoding::encode(filename)
    )
}
