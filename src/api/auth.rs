//! Authorization endpoints: code submission, provider callback, status, sign-out.

use super::{AppError, AppState};
use crate::oauth::AuthOutcome;
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Request body for POST /api/generate
#[derive(Deserialize)]
pub(super) struct GenerateRequest {
    #[serde(default)]
    code: Option<String>,
}

/// Response for POST /api/generate and DELETE /api/auth/token
#[derive(Serialize)]
pub(super) struct SuccessResponse {
    success: bool,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub(super) struct OAuthCallback {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth callback success response
#[derive(Serialize)]
pub(super) struct CallbackResponse {
    success: bool,
    message: String,
}

/// Response for GET /api/auth
#[derive(Serialize)]
pub(super) struct AuthStatusResponse {
    authorized: bool,
    #[serde(rename = "authUrl", skip_serializing_if = "Option::is_none")]
    auth_url: Option<String>,
}

/// POST /api/generate
///
/// Exchanges a one-time authorization code pasted by the user.
pub(super) async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let code = request.code.unwrap_or_default();
    let success = state
        .manager
        .complete_authorization(&code)
        .await
        .map_err(AppError::from)?;

    Ok(Json(SuccessResponse { success }))
}

/// GET /oauth/callback
///
/// Redirect target registered with the provider.
pub(super) async fn callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<CallbackResponse>, AppError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Authorization denied");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;

    let success = state
        .manager
        .complete_authorization(&code)
        .await
        .map_err(AppError::from)?;

    if !success {
        return Err(AppError::BadGateway(
            "Token endpoint granted no token".to_string(),
        ));
    }

    info!("Authorization completed via callback");
    Ok(Json(CallbackResponse {
        success: true,
        message: "Mailbox connected. You can close this window.".to_string(),
    }))
}

/// GET /api/auth
pub(super) async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuthStatusResponse>, AppError> {
    let response = match state.manager.authenticate().map_err(AppError::from)? {
        AuthOutcome::Authorized(_) => AuthStatusResponse {
            authorized: true,
            auth_url: None,
        },
        AuthOutcome::NeedsAuthorization { url } => AuthStatusResponse {
            authorized: false,
            auth_url: Some(url),
        },
    };
    Ok(Json(response))
}

/// DELETE /api/auth/token
pub(super) async fn sign_out(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.manager.sign_out().await.map_err(AppError::from)? {
        return Err(AppError::NotFound("No stored token".to_string()));
    }
    Ok(Json(SuccessResponse { success: true }))
}
