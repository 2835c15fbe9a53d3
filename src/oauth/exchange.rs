//! OAuth token endpoint calls.
//!
//! Handles exchanging authorization codes for tokens and refreshing access
//! tokens with a refresh token.

use crate::credentials::{ClientCredential, GrantedToken};
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Remote token endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange a one-time authorization code.
    ///
    /// `Ok(None)` means the endpoint answered but granted no token.
    async fn exchange_code(
        &self,
        client: &ClientCredential,
        code: &str,
    ) -> MailResult<Option<GrantedToken>>;

    /// Run the refresh-token grant.
    ///
    /// A rejected refresh token is reported as `Unauthorized`; transport
    /// problems as `AuthExchange`.
    async fn refresh(
        &self,
        client: &ClientCredential,
        refresh_token: &str,
    ) -> MailResult<GrantedToken>;
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_granted(self, now: DateTime<Utc>) -> Option<GrantedToken> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        Some(GrantedToken {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expiry: self.expires_in.map(|seconds| now + Duration::seconds(seconds)),
            scope: self.scope.unwrap_or_default(),
            token_type: self.token_type,
        })
    }
}

/// Token exchanger talking to the provider over HTTPS.
pub struct HttpTokenExchanger {
    http_client: Client,
    token_url: String,
}

impl HttpTokenExchanger {
    pub fn new(token_url: String, timeout: StdDuration) -> MailResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::AuthExchange(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            token_url,
        })
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> MailResult<reqwest::Response> {
        tracing::debug!("Calling token endpoint at {}", self.token_url);

        self.http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| MailError::AuthExchange(format!("Failed to send token request: {}", e)))
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(
        &self,
        client: &ClientCredential,
        code: &str,
    ) -> MailResult<Option<GrantedToken>> {
        let response = self
            .post_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", client.redirect_uri.as_str()),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ])
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MailError::AuthExchange(format!(
                "Token exchange failed with status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::AuthExchange(format!("Failed to parse token response: {}", e)))?;

        tracing::debug!(
            "Token exchange answered, has_access_token={}, has_refresh_token={}, expires_in={:?}",
            token_response.access_token.is_some(),
            token_response.refresh_token.is_some(),
            token_response.expires_in
        );

        Ok(token_response.into_granted(Utc::now()))
    }

    async fn refresh(
        &self,
        client: &ClientCredential,
        refresh_token: &str,
    ) -> MailResult<GrantedToken> {
        let response = self
            .post_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ])
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Unauthorized(format!(
                "Refresh token rejected with status {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(MailError::AuthExchange(format!(
                "Token refresh failed with status {}",
                status
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::AuthExchange(format!("Failed to parse refresh response: {}", e)))?;

        let mut token = token_response.into_granted(Utc::now()).ok_or_else(|| {
            MailError::AuthExchange("Refresh response carried no access token".to_string())
        })?;

        // Providers usually keep the refresh token unchanged and omit it
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }
}
