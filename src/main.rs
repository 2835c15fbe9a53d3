use anyhow::{Context, Result};
use mailsearch::api::{create_router, AppState};
use mailsearch::config;
use mailsearch::credentials::{CredentialStore, FileCredentialStore};
use mailsearch::mailbox::{GmailClient, MailSearchClient};
use mailsearch::oauth::{AuthorizationEndpoint, AuthorizationManager, HttpTokenExchanger, TokenExchanger};
use mailsearch::pipeline::AggregationPipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsearch=info".into()),
        )
        .init();

    info!("mailsearch starting...");

    let config_path = std::env::var("MAILSEARCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));
    let config = config::load_or_default(&config_path)?;

    // Credential store
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(
        config.storage.credentials_path.clone(),
        config.storage.token_path.clone(),
    ));
    if store.load_client().is_none() {
        warn!(
            path = %config.storage.credentials_path.display(),
            "No usable client credential; requests will fail until one is provided"
        );
    }

    // Authorization manager
    let exchanger: Arc<dyn TokenExchanger> = Arc::new(
        HttpTokenExchanger::new(
            config.provider.token_url.clone(),
            config.provider.request_timeout(),
        )
        .context("Failed to create token exchanger")?,
    );
    let manager = Arc::new(AuthorizationManager::new(
        store,
        exchanger,
        AuthorizationEndpoint::from_config(&config.provider),
    ));

    // Mailbox client and pipeline
    let mail_client: Arc<dyn MailSearchClient> = Arc::new(
        GmailClient::from_config(&config.provider)
            .context("Failed to create Gmail client")?
            .with_max_concurrency(config.pipeline.max_concurrent_fetches),
    );
    let pipeline = Arc::new(AggregationPipeline::new(
        Arc::clone(&mail_client),
        &config.pipeline,
    ));
    info!(
        max_concurrent_fetches = config.pipeline.max_concurrent_fetches,
        failure_policy = %config.pipeline.failure_policy,
        "Aggregation pipeline ready"
    );

    let state = AppState {
        manager,
        pipeline,
        mail_client,
        public_base_url: config.server.public_base_url.clone(),
        search_timeout: config.pipeline.timeout(),
    };
    let router = create_router(state).layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("mailsearch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl_c signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
