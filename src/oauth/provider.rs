//! Authorization endpoint configuration.

use crate::config::ProviderConfig;
use crate::credentials::ClientCredential;

/// Where users are sent to grant access, and which scopes are requested.
#[derive(Clone, Debug)]
pub struct AuthorizationEndpoint {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,
}

impl AuthorizationEndpoint {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            auth_url: config.auth_url.clone(),
            scopes: config.scopes.clone(),
        }
    }

    /// Space-separated scope string as sent to the provider
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Build the consent URL for `client`.
    ///
    /// Offline access is always requested so the exchange yields a refresh
    /// token. The result depends only on the endpoint and the client.
    pub fn build_auth_url(&self, client: &ClientCredential) -> String {
        format!(
            "{}?access_type=offline&scope={}&response_type=code&client_id={}&redirect_uri={}",
            self.auth_url,
            urlencoding::encode(&self.scope()),
            urlencoding::encode(&client.client_id),
            urlencoding::encode(&client.redirect_uri),
        )
    }
}
