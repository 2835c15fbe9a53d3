//! Durable storage for the OAuth client credential and the granted token.
//!
//! Two opaque records are kept:
//!
//! ```text
//! credentials.json   operator-provided client id/secret/redirect URI (read-only)
//! token.json         granted token, overwritten on every exchange or refresh
//! ```
//!
//! Unreadable or corrupt records are reported as absent (with a warning) so the
//! service falls back to issuing a fresh authorization URL instead of failing.
//!
//! # Usage
//!
//! ```no_run
//! use mailsearch::credentials::{CredentialStore, FileCredentialStore};
//!
//! let store = FileCredentialStore::new("credentials.json", "token.json");
//! if let Some(client) = store.load_client() {
//!     println!("client id: {}", client.client_id);
//! }
//! println!("authorized: {}", store.load_token().is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MailResult;

mod memory;
mod storage;

pub use memory::MemoryCredentialStore;
pub use storage::FileCredentialStore;

/// OAuth client registration, loaded once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredential {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Token granted by the provider's token endpoint.
///
/// Field names follow the provider client library's token file so existing
/// `token.json` files load unchanged (`expiry_date` is epoch milliseconds).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedToken {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(
        rename = "expiry_date",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<DateTime<Utc>>,

    #[serde(default)]
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl GrantedToken {
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Mask a token for log output: first 4 chars, then `***`.
pub fn mask_token(token: &str) -> String {
    match token.get(..4) {
        Some(prefix) if token.len() > 4 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}

impl fmt::Debug for GrantedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantedToken")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_token))
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Persistence contract for the single credential/token pair.
///
/// Loads never fail: missing, unreadable or corrupt records are `None`.
/// Writes fully overwrite the previous record.
pub trait CredentialStore: Send + Sync {
    fn load_client(&self) -> Option<ClientCredential>;

    fn load_token(&self) -> Option<GrantedToken>;

    fn save_token(&self, token: &GrantedToken) -> MailResult<()>;

    /// Remove the stored token. Returns false when there was none.
    fn clear_token(&self) -> MailResult<bool>;
}
