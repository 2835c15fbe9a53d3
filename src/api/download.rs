//! GET /download/:message_id/:attachment_id[/:filename]

use super::{AppError, AppState};
use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Downloads are served as PDF; the filename tells the browser the rest.
const DOWNLOAD_CONTENT_TYPE: &str = "application/pdf";

pub(super) async fn download(
    State(state): State<Arc<AppState>>,
    Path((message_id, attachment_id, filename)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    serve_attachment(&state, &message_id, &attachment_id, Some(filename)).await
}

pub(super) async fn download_unnamed(
    State(state): State<Arc<AppState>>,
    Path((message_id, attachment_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    serve_attachment(&state, &message_id, &attachment_id, None).await
}

async fn serve_attachment(
    state: &AppState,
    message_id: &str,
    attachment_id: &str,
    filename: Option<String>,
) -> Result<Response, AppError> {
    let client = state.authorized_client()?;
    debug!(message_id = %message_id, attachment_id = %attachment_id, "Download requested");

    let bytes = match state
        .mail_client
        .fetch_attachment_bytes(&client, message_id, attachment_id)
        .await
    {
        Err(e) if e.is_unauthorized() => {
            info!("Provider rejected stored token, recovering");
            let client = state.recover(&client).await?;
            match state
                .mail_client
                .fetch_attachment_bytes(&client, message_id, attachment_id)
                .await
            {
                Err(e) if e.is_unauthorized() => return Err(state.abandon(&client).await),
                other => other,
            }
        }
        other => other,
    }
    .map_err(|e| state.app_error(e))?;

    let filename = filename
        .map(|f| sanitize_filename(&f))
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| default_filename(Utc::now()));

    info!(
        message_id = %message_id,
        attachment_id = %attachment_id,
        size = bytes.len(),
        "Serving attachment"
    );

    Ok((
        [
            (header::CONTENT_TYPE, DOWNLOAD_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Compact ISO-8601 timestamp, e.g. `20240102T030405678Z.pdf`
fn default_filename(now: DateTime<Utc>) -> String {
    format!("{}.pdf", now.format("%Y%m%dT%H%M%S%3fZ"))
}

/// Strip characters that would break the quoted `Content-Disposition` value.
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect::<String>()
        .trim()
        .to_string()
}
