use super::ServiceConfig;
use crate::pipeline::FailurePolicy;
use std::path::PathBuf;
use tracing::warn;

/// Apply `MAILSEARCH_*` overrides on top of file/default values.
///
/// Unparseable values are ignored with a warning. `lookup` is injected so tests
/// don't have to touch the process environment.
pub fn apply_overrides<F>(config: &mut ServiceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("MAILSEARCH_HOST") {
        config.server.host = v;
    }
    if let Some(v) = lookup("MAILSEARCH_PORT") {
        match v.parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %v, "Ignoring invalid MAILSEARCH_PORT"),
        }
    }
    if let Some(v) = lookup("MAILSEARCH_PUBLIC_BASE_URL") {
        config.server.public_base_url = Some(v.trim_end_matches('/').to_string());
    }
    if let Some(v) = lookup("MAILSEARCH_CREDENTIALS_PATH") {
        config.storage.credentials_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("MAILSEARCH_TOKEN_PATH") {
        config.storage.token_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("MAILSEARCH_MAX_CONCURRENT_FETCHES") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 => config.pipeline.max_concurrent_fetches = n,
            _ => warn!(value = %v, "Ignoring invalid MAILSEARCH_MAX_CONCURRENT_FETCHES"),
        }
    }
    if let Some(v) = lookup("MAILSEARCH_FAILURE_POLICY") {
        match v.parse::<FailurePolicy>() {
            Ok(policy) => config.pipeline.failure_policy = policy,
            Err(_) => warn!(value = %v, "Ignoring invalid MAILSEARCH_FAILURE_POLICY"),
        }
    }
}
