//! Error taxonomy shared by the authorization and search layers.

use thiserror::Error;

/// Result type for mail search operations
pub type MailResult<T> = Result<T, MailError>;

/// Errors that can occur while authorizing or searching
#[derive(Debug, Error)]
pub enum MailError {
    /// No client credential is available; nothing can proceed without one
    #[error("Client credential not configured: {0}")]
    ConfigurationMissing(String),

    /// Caller supplied empty or malformed input (authorization code, query)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Token endpoint exchange failed (network error or rejection)
    #[error("Authorization code exchange failed: {0}")]
    AuthExchange(String),

    /// The stored token was rejected by the provider at call time
    #[error("Provider rejected the stored token: {0}")]
    Unauthorized(String),

    /// Attachment lookup for one message failed during aggregation
    #[error("Failed to fetch attachments for message {message_id}: {source}")]
    AttachmentFetch {
        message_id: String,
        #[source]
        source: Box<MailError>,
    },

    /// Requested message or attachment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other provider failure (transport error, unexpected status, bad payload)
    #[error("Mailbox provider error: {0}")]
    Provider(String),

    /// Durable storage could not be written
    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl MailError {
    /// Wrap a per-message failure, keeping `Unauthorized` visible to the caller.
    pub fn attachment_fetch(message_id: &str, source: MailError) -> Self {
        match source {
            MailError::Unauthorized(_) => source,
            other => MailError::AttachmentFetch {
                message_id: message_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True when the failure means the caller has to re-authorize.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, MailError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        MailError::Provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_fetch_wraps_message_id() {
        let err = MailError::attachment_fetch("m2", MailError::Provider("boom".to_string()));
        match &err {
            MailError::AttachmentFetch { message_id, source } => {
                assert_eq!(message_id, "m2");
                assert!(matches!(**source, MailError::Provider(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("m2"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unauthorized_is_not_wrapped() {
        let err = MailError::attachment_fetch("m1", MailError::Unauthorized("401".to_string()));
        assert!(err.is_unauthorized());
    }
}
