//! Delegated-authorization lifecycle.
//!
//! Implements the authorization code flow against the mailbox provider:
//! 1. `authenticate()` finds no stored token and returns a consent URL
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back with a one-time code
//! 4. `complete_authorization(code)` exchanges it and stores the token
//! 5. Later `authenticate()` calls hand out an `AuthorizedClient`
//!
//! When the provider rejects a stored token at call time,
//! `recover_from_rejection` refreshes it or drops back to step 1.

mod exchange;
mod provider;

pub use exchange::{HttpTokenExchanger, TokenExchanger};
pub use provider::AuthorizationEndpoint;

use crate::credentials::{mask_token, ClientCredential, CredentialStore, GrantedToken};
use crate::error::{MailError, MailResult};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


/// Capability to call the provider on behalf of the authorized user.
///
/// Bound to one credential/token pair. Not `Clone`: a new authorization cycle
/// produces a new client.
#[derive(Debug)]
pub struct AuthorizedClient {
    credential: ClientCredential,
    token: GrantedToken,
}

impl AuthorizedClient {
    pub fn new(credential: ClientCredential, token: GrantedToken) -> Self {
        Self { credential, token }
    }

    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }

    pub fn token(&self) -> &GrantedToken {
        &self.token
    }

    pub fn client_id(&self) -> &str {
        &self.credential.client_id
    }
}

/// Result of `authenticate()`: either a usable client or a URL to visit.
#[derive(Debug)]
pub enum AuthOutcome {
    NeedsAuthorization { url: String },
    Authorized(AuthorizedClient),
}

/// Observable authorization state derived from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    NoToken,
    Authorized,
}

/// Owns the token lifecycle for one credential store.
pub struct AuthorizationManager {
    store: Arc<dyn CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
    endpoint: AuthorizationEndpoint,
    /// Serializes read-modify-write of the stored token
    token_lock: Mutex<()>,
}

impl AuthorizationManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        exchanger: Arc<dyn TokenExchanger>,
        endpoint: AuthorizationEndpoint,
    ) -> Self {
        Self {
            store,
            exchanger,
            endpoint,
            token_lock: Mutex::new(()),
        }
    }

    fn client_credential(&self) -> MailResult<ClientCredential> {
        self.store.load_client().ok_or_else(|| {
            MailError::ConfigurationMissing(
                "no usable OAuth client credential (check the client secret file)".to_string(),
            )
        })
    }

    /// Consent URL for the configured client.
    pub fn authorization_url(&self) -> MailResult<String> {
        let credential = self.client_credential()?;
        Ok(self.endpoint.build_auth_url(&credential))
    }

    pub fn state(&self) -> MailResult<AuthState> {
        self.client_credential()?;
        Ok(match self.store.load_token() {
            Some(_) => AuthState::Authorized,
            None => AuthState::NoToken,
        })
    }

    /// Hand out a client bound to the stored token, or the URL to obtain one.
    ///
    /// Never writes to the store.
    pub fn authenticate(&self) -> MailResult<AuthOutcome> {
        let credential = self.client_credential()?;

        match self.store.load_token() {
            Some(token) => {
                debug!(access_token = %mask_token(&token.access_token), "Using stored token");
                Ok(AuthOutcome::Authorized(AuthorizedClient::new(credential, token)))
            }
            None => {
                info!("No token found, issuing authorization URL");
                Ok(AuthOutcome::NeedsAuthorization {
                    url: self.endpoint.build_auth_url(&credential),
                })
            }
        }
    }

    /// Exchange a one-time authorization code and persist the granted token.
    ///
    /// Returns `Ok(false)` when the endpoint granted nothing; the store is
    /// left untouched in that case and on every error.
    pub async fn complete_authorization(&self, code: &str) -> MailResult<bool> {
        let code = code.trim();
        if code.is_empty() {
            return Err(MailError::InvalidArgument(
                "authorization code is required".to_string(),
            ));
        }

        let credential = self.client_credential()?;
        let _guard = self.token_lock.lock().await;

        let Some(mut token) = self.exchanger.exchange_code(&credential, code).await? else {
            warn!("Token endpoint granted no token");
            return Ok(false);
        };

        if token.scope.is_empty() {
            token.scope = self.endpoint.scope();
        }
        self.store.save_token(&token)?;

        info!(
            has_refresh_token = token.has_refresh_token(),
            expiry = ?token.expiry,
            "Authorization completed"
        );
        Ok(true)
    }

    /// React to the provider rejecting `rejected`'s token.
    ///
    /// Refreshes when a refresh token is available. Otherwise, or when the
    /// refresh itself is rejected, the stored token is cleared and a fresh
    /// authorization URL is returned. Transport failures during refresh are
    /// returned as errors and leave the store untouched.
    pub async fn recover_from_rejection(
        &self,
        rejected: &AuthorizedClient,
    ) -> MailResult<AuthOutcome> {
        let credential = self.client_credential()?;
        let _guard = self.token_lock.lock().await;

        let Some(stored) = self.store.load_token() else {
            return Ok(AuthOutcome::NeedsAuthorization {
                url: self.endpoint.build_auth_url(&credential),
            });
        };

        // Another request already replaced the rejected token
        if stored.access_token != rejected.access_token() {
            debug!("Stored token changed since rejection, reusing it");
            return Ok(AuthOutcome::Authorized(AuthorizedClient::new(credential, stored)));
        }

        if let Some(refresh_token) = stored.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            match self.exchanger.refresh(&credential, refresh_token).await {
                Ok(mut token) => {
                    if token.scope.is_empty() {
                        token.scope = stored.scope.clone();
                    }
                    self.store.save_token(&token)?;
                    info!(expiry = ?token.expiry, "Access token refreshed");
                    return Ok(AuthOutcome::Authorized(AuthorizedClient::new(credential, token)));
                }
                Err(MailError::Unauthorized(reason)) => {
                    warn!(reason = %reason, "Refresh token rejected, re-authorization required");
                }
                Err(e) => return Err(e),
            }
        }

        self.store.clear_token()?;
        Ok(AuthOutcome::NeedsAuthorization {
            url: self.endpoint.build_auth_url(&credential),
        })
    }

    /// Drop `rejected`'s token when recovery did not help.
    ///
    /// Only clears the store if it still holds that exact token, so a token
    /// written concurrently by another authorization survives. Returns the
    /// consent URL either way.
    pub async fn invalidate(&self, rejected: &AuthorizedClient) -> MailResult<String> {
        let credential = self.client_credential()?;
        let _guard = self.token_lock.lock().await;

        let still_stored = self
            .store
            .load_token()
            .is_some_and(|t| t.access_token == rejected.access_token());
        if still_stored {
            self.store.clear_token()?;
            warn!(
                access_token = %mask_token(rejected.access_token()),
                "Token rejected after recovery, cleared"
            );
        }

        Ok(self.endpoint.build_auth_url(&credential))
    }

    /// Forget the stored token. Returns false when none was stored.
    pub async fn sign_out(&self) -> MailResult<bool> {
        let _guard = self.token_lock.lock().await;
        let removed = self.store.clear_token()?;
        if removed {
            info!("Stored token cleared");
        }
        Ok(removed)
    }
}
