pub mod env;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::FailurePolicy;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origin used for download links. When unset, links are built from the
    /// request's Host header.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: None,
        }
    }
}

/// Where the client credential and granted token live on disk
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_path: default_token_path(),
        }
    }
}

/// Mailbox provider endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Maximum hits requested per search
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()]
}

fn default_max_results() -> u32 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            scopes: default_scopes(),
            max_results: default_max_results(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Aggregation pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on concurrent per-message attachment lookups
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Deadline for one whole search request, enforced by the HTTP layer
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_seconds: u64,
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_pipeline_timeout() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            failure_policy: FailurePolicy::default(),
            timeout_seconds: default_pipeline_timeout(),
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ServiceConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Load the TOML file if it exists, then apply environment overrides.
pub fn load_or_default(path: &Path) -> Result<ServiceConfig> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        ServiceConfig::default()
    };
    env::apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.token_path, PathBuf::from("token.json"));
        assert_eq!(
            config.provider.scopes,
            vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()]
        );
        assert_eq!(config.pipeline.max_concurrent_fetches, 10);
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::AllOrNothing);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            public_base_url = "https://mail.example.com"

            [storage]
            credentials_path = "/etc/mailsearch/credentials.json"
            token_path = "/var/lib/mailsearch/token.json"

            [provider]
            api_base_url = "http://localhost:9999"
            max_results = 25

            [pipeline]
            max_concurrent_fetches = 4
            failure_policy = "best_effort"
            timeout_seconds = 15
        "#;

        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.server.public_base_url.as_deref(),
            Some("https://mail.example.com")
        );
        assert_eq!(
            config.storage.token_path,
            PathBuf::from("/var/lib/mailsearch/token.json")
        );
        assert_eq!(config.provider.api_base_url, "http://localhost:9999");
        assert_eq!(config.provider.max_results, 25);
        // Unset provider fields keep their defaults
        assert_eq!(config.provider.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(config.pipeline.max_concurrent_fetches, 4);
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(config.pipeline.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [pipeline]
            max_concurrent_fetches = 2
        "#;

        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.max_concurrent_fetches, 2);
        assert_eq!(config.server.port, 3000); // Default
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::AllOrNothing); // Default
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.provider.max_results, 100);
    }

    #[test]
    fn test_load_config_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
