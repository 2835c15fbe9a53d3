// Error taxonomy
pub mod error;

// TOML + environment configuration
pub mod config;

// Client credential and granted token persistence
pub mod credentials;

// Delegated-authorization lifecycle
pub mod oauth;

// Mailbox provider capability (Gmail)
pub mod mailbox;

// Search-and-attachment aggregation
pub mod pipeline;

// HTTP routes
pub mod api;

pub use error::{MailError, MailResult};
