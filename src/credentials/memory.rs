use super::{ClientCredential, CredentialStore, GrantedToken};
use crate::error::MailResult;
use std::sync::{Mutex, PoisonError};

/// In-memory credential store for embedding and tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    client: Option<ClientCredential>,
    token: Mutex<Option<GrantedToken>>,
}

impl MemoryCredentialStore {
    pub fn new(client: Option<ClientCredential>) -> Self {
        Self {
            client,
            token: Mutex::new(None),
        }
    }

    pub fn with_token(self, token: GrantedToken) -> Self {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load_client(&self) -> Option<ClientCredential> {
        self.client.clone()
    }

    fn load_token(&self) -> Option<GrantedToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save_token(&self, token: &GrantedToken) -> MailResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(())
    }

    fn clear_token(&self) -> MailResult<bool> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some())
    }
}
