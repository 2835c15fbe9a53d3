//! GET /api/search

use super::{AppError, AppState};
use crate::error::MailResult;
use crate::oauth::AuthorizedClient;
use crate::pipeline::EnrichedResult;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Deserialize)]
pub(super) struct SearchParams {
    #[serde(default)]
    q: Option<String>,
}

/// One attachment in a search response
#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(super) struct AttachmentLink {
    mime_type: String,
    filename: String,
    download_url: String,
}

/// One message in a search response
#[derive(Serialize, Debug, PartialEq)]
pub(super) struct SearchHit {
    id: String,
    snippet: String,
    name: String,
    email: String,
    attachments: Vec<AttachmentLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SearchHit {
    fn from_result(result: EnrichedResult, origin: &str) -> Self {
        Self {
            attachments: result
                .download_descriptors
                .into_iter()
                .map(|d| AttachmentLink {
                    mime_type: d.mime_type,
                    filename: d.filename,
                    download_url: format!("{}{}", origin, d.path),
                })
                .collect(),
            id: result.id,
            snippet: result.snippet,
            name: result.sender_name,
            email: result.sender_email,
            error: result.error,
        }
    }
}

/// GET /api/search?q=
///
/// Runs the aggregation pipeline. A rejected token is refreshed (or the
/// caller is sent back through consent) and the search retried once.
pub(super) async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Query parameter 'q' is required".to_string(),
        ));
    }

    let client = state.authorized_client()?;

    debug!(query = %query, "Search requested");

    // Both attempts share one deadline
    let deadline = Instant::now() + state.search_timeout;
    let results = match run_until(&state, &client, &query, deadline).await? {
        Err(e) if e.is_unauthorized() => {
            info!("Provider rejected stored token, recovering");
            let client = state.recover(&client).await?;
            match run_until(&state, &client, &query, deadline).await? {
                Err(e) if e.is_unauthorized() => return Err(state.abandon(&client).await),
                other => other,
            }
        }
        other => other,
    }
    .map_err(|e| state.app_error(e))?;

    let origin = request_origin(&state, &headers);
    Ok(Json(
        results
            .into_iter()
            .map(|r| SearchHit::from_result(r, &origin))
            .collect(),
    ))
}

async fn run_until(
    state: &AppState,
    client: &AuthorizedClient,
    query: &str,
    deadline: Instant,
) -> Result<MailResult<Vec<EnrichedResult>>, AppError> {
    tokio::time::timeout_at(deadline, state.pipeline.run(client, query))
        .await
        .map_err(|_| {
            AppError::GatewayTimeout(format!(
                "Search did not complete within {}s",
                state.search_timeout.as_secs()
            ))
        })
}

/// `{scheme}://{host}` for download URLs
fn request_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.public_base_url {
        return base.clone();
    }

    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return String::new();
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}
