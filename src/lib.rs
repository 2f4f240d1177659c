//! gctl
//!
//! A command-line client for Google Drive and Gmail built around a cached,
//! self-renewing OAuth2 credential.
//!
//! # Overview
//!
//! - **Credentials**: a state machine that loads the cached token, refreshes it
//!   when it expires and falls back to interactive authorization at most once
//! - **Token cache**: atomic, owner-only JSON file on disk
//! - **Search**: bounded pagination over any [`search::RemoteCollection`]
//! - **Adapters**: Drive documents (search, HTML import) and Gmail messages
//!   (search, full message retrieval)
//!
//! # Example Usage
//!
//! ```no_run
//! use gctl::{app::App, config::Config, models::SearchQuery};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(&gctl::config::default_config_path()).await?;
//!     let app = App::new(config).await?;
//!
//!     let cancel = CancellationToken::new();
//!     let docs = app
//!         .search_drive(&SearchQuery::new("name contains 'notes'", 10), &cancel)
//!         .await?;
//!     for doc in docs {
//!         println!("{} {}", doc.id, doc.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`app`] - Composition root wiring config, transport and credentials
//! - [`authorizer`] - Interactive authorization-code flow
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`credentials`] - Credential lifecycle and token source
//! - [`drive`] - Google Drive adapter
//! - [`error`] - Error types and result aliases
//! - [`http`] - HTTPS transport with timeouts and cancellation
//! - [`mail`] - Gmail adapter
//! - [`models`] - Core data structures
//! - [`oauth`] - OAuth2 token endpoint client
//! - [`search`] - Paginated search
//! - [`token_store`] - Credential persistence

pub mod app;
pub mod authorizer;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod drive;
pub mod error;
pub mod http;
pub mod mail;
pub mod models;
pub mod oauth;
pub mod search;
pub mod token_store;

// Re-export commonly used types for convenience
pub use app::App;
pub use authorizer::{InstalledFlowAuthorizer, InteractiveAuthorizer, ReturnMethod};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use credentials::{CredentialManager, TokenSource};
pub use drive::DriveCollection;
pub use error::{AuthError, CacheError, GctlError, RemoteError, Result};
pub use mail::GmailCollection;

// Core data models
pub use models::{
    Credential, DocumentMetadata, DocumentSummary, Email, MessageSummary, ResultPage, SearchQuery,
};

pub use oauth::{OAuthClient, TokenRefresher};
pub use search::{PaginatedSearchClient, RemoteCollection};
pub use token_store::{FileTokenStore, TokenStore};
