//! File-backed credential storage.
//!
//! The client credential is the provider's downloaded client-secret JSON
//! (`web` or `installed` section). The token is a single JSON object written
//! atomically with owner-only permissions.

use super::{ClientCredential, CredentialStore, GrantedToken};
use crate::error::{MailError, MailResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Client-secret file as downloaded from the provider console
#[derive(Deserialize)]
struct ClientSecretFile {
    web: Option<ClientSecretSection>,
    installed: Option<ClientSecretSection>,
}

#[derive(Deserialize)]
struct ClientSecretSection {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Credential store backed by two JSON files.
///
/// # Thread Safety
/// Reads and writes go straight to the filesystem. Callers that perform
/// read-modify-write sequences on the token must serialize them; the
/// authorization manager does this with its own lock.
pub struct FileCredentialStore {
    credentials_path: PathBuf,
    token_path: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(credentials_path: P, token_path: Q) -> Self {
        Self {
            credentials_path: credentials_path.as_ref().to_path_buf(),
            token_path: token_path.as_ref().to_path_buf(),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load_client(&self) -> Option<ClientCredential> {
        let file: ClientSecretFile = read_json_file(&self.credentials_path)?;

        let Some(section) = file.web.or(file.installed) else {
            warn!(
                path = %self.credentials_path.display(),
                "Client secret file has neither a 'web' nor an 'installed' section"
            );
            return None;
        };

        let Some(redirect_uri) = section.redirect_uris.into_iter().next() else {
            warn!(
                path = %self.credentials_path.display(),
                "Client secret file lists no redirect_uris"
            );
            return None;
        };

        Some(ClientCredential {
            client_id: section.client_id,
            client_secret: section.client_secret,
            redirect_uri,
        })
    }

    fn load_token(&self) -> Option<GrantedToken> {
        let token: GrantedToken = read_json_file(&self.token_path)?;
        debug!(
            path = %self.token_path.display(),
            expiry = ?token.expiry,
            "Loaded granted token"
        );
        Some(token)
    }

    fn save_token(&self, token: &GrantedToken) -> MailResult<()> {
        if let Some(parent) = self.token_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MailError::Storage(format!(
                        "failed to create token directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let content = serde_json::to_string(token)
            .map_err(|e| MailError::Storage(format!("failed to serialize token: {}", e)))?;

        // Sibling temp file, then rename over the old token
        let tmp_path = self.token_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| {
            MailError::Storage(format!(
                "failed to write token file '{}': {}",
                tmp_path.display(),
                e
            ))
        })?;
        set_owner_only_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.token_path).map_err(|e| {
            MailError::Storage(format!(
                "failed to replace token file '{}': {}",
                self.token_path.display(),
                e
            ))
        })?;

        debug!(path = %self.token_path.display(), "Saved granted token");
        Ok(())
    }

    fn clear_token(&self) -> MailResult<bool> {
        match std::fs::remove_file(&self.token_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MailError::Storage(format!(
                "failed to delete token file '{}': {}",
                self.token_path.display(),
                e
            ))),
        }
    }
}

/// Read and parse a JSON file; missing or broken files are `None`.
fn read_json_file<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read file, treating as absent");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse file, treating as absent");
            None
        }
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> MailResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
        MailError::Storage(format!(
            "failed to set permissions on '{}': {}",
            path.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> MailResult<()> {
    Ok(())
}
