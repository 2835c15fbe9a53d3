//! HTTP routes.
//!
//! Thin layer over the core: parse the request, call the manager or the
//! pipeline, map `MailError` onto a status code. Rejected tokens are
//! recovered from once per request via `AuthorizationManager::recover_from_rejection`.

mod auth;
mod download;
mod search;

use crate::error::MailError;
use crate::mailbox::MailSearchClient;
use crate::oauth::{AuthOutcome, AuthorizationManager, AuthorizedClient};
use crate::pipeline::AggregationPipeline;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const REAUTHORIZE_MESSAGE: &str = "Credentials have expired. Please re-authenticate.";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AuthorizationManager>,
    pub pipeline: Arc<AggregationPipeline>,
    pub mail_client: Arc<dyn MailSearchClient>,
    /// Origin used for download URLs; the request's `Host` when unset
    pub public_base_url: Option<String>,
    /// Upper bound on one pipeline run
    pub search_timeout: Duration,
}

/// Create the service router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search::search))
        .route("/api/generate", post(auth::generate))
        .route("/api/auth", get(auth::status))
        .route("/api/auth/token", delete(auth::sign_out))
        .route("/oauth/callback", get(auth::callback))
        .route(
            "/download/:message_id/:attachment_id",
            get(download::download_unnamed),
        )
        .route(
            "/download/:message_id/:attachment_id/:filename",
            get(download::download),
        )
        .with_state(Arc::new(state))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(rename = "authUrl", skip_serializing_if = "Option::is_none")]
    auth_url: Option<String>,
}

/// Application error types
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized {
        message: String,
        auth_url: Option<String>,
    },
    NotFound(String),
    ServerError(String),
    BadGateway(String),
    GatewayTimeout(String),
}

impl AppError {
    fn reauthorize(auth_url: String) -> Self {
        AppError::Unauthorized {
            message: REAUTHORIZE_MESSAGE.to_string(),
            auth_url: Some(auth_url),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, auth_url) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized { message, auth_url } => {
                (StatusCode::UNAUTHORIZED, message, auth_url)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg, None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            auth_url,
        });

        (status, body).into_response()
    }
}

impl From<MailError> for AppError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::InvalidArgument(msg) => AppError::BadRequest(msg),
            MailError::Unauthorized(_) => AppError::Unauthorized {
                message: REAUTHORIZE_MESSAGE.to_string(),
                auth_url: None,
            },
            MailError::NotFound(msg) => AppError::NotFound(msg),
            e @ (MailError::AuthExchange(_)
            | MailError::AttachmentFetch { .. }
            | MailError::Provider(_)) => {
                warn!(error = %e, "Upstream call failed");
                AppError::BadGateway(e.to_string())
            }
            e @ (MailError::ConfigurationMissing(_) | MailError::Storage(_)) => {
                error!(error = %e, "Service misconfigured");
                AppError::ServerError(e.to_string())
            }
        }
    }
}

impl AppState {
    /// Map a core error, attaching a consent URL when re-authorization is needed.
    fn app_error(&self, e: MailError) -> AppError {
        if e.is_unauthorized() {
            if let Ok(url) = self.manager.authorization_url() {
                return AppError::reauthorize(url);
            }
        }
        AppError::from(e)
    }

    /// The stored client, or 401 with the consent URL.
    fn authorized_client(&self) -> Result<AuthorizedClient, AppError> {
        match self.manager.authenticate().map_err(AppError::from)? {
            AuthOutcome::Authorized(client) => Ok(client),
            AuthOutcome::NeedsAuthorization { url } => Err(AppError::reauthorize(url)),
        }
    }

    /// Replacement client after the provider rejected `rejected`.
    async fn recover(&self, rejected: &AuthorizedClient) -> Result<AuthorizedClient, AppError> {
        match self
            .manager
            .recover_from_rejection(rejected)
            .await
            .map_err(|e| self.app_error(e))?
        {
            AuthOutcome::Authorized(client) => Ok(client),
            AuthOutcome::NeedsAuthorization { url } => Err(AppError::reauthorize(url)),
        }
    }

    /// The recovered token was rejected too: drop it and send the caller
    /// back through consent.
    async fn abandon(&self, rejected: &AuthorizedClient) -> AppError {
        match self.manager.invalidate(rejected).await {
            Ok(url) => AppError::reauthorize(url),
            Err(e) => self.app_error(e),
        }
    }
}
