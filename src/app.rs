//! Wires configuration, transport and credentials into ready-to-use adapters

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::authorizer::InstalledFlowAuthorizer;
use crate::config::Config;
use crate::credentials::CredentialManager;
use crate::drive::DriveCollection;
use crate::error::Result;
use crate::http::HttpClient;
use crate::mail::GmailCollection;
use crate::models::{Credential, SearchQuery};
use crate::oauth::OAuthClient;
use crate::search::PaginatedSearchClient;
use crate::token_store::FileTokenStore;

/// Everything a command needs, built once per process
pub struct App {
    config: Config,
    http: HttpClient,
    credentials: CredentialManager,
}

impl App {
    /// Build the production stack from a resolved configuration.
    ///
    /// Reads the OAuth client secret; nothing touches the network yet.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let http = HttpClient::new(Duration::from_secs(config.http.timeout_secs))?;
        let oauth = OAuthClient::from_secret_file(&config.credentials_file, http.clone()).await?;
        let authorizer = InstalledFlowAuthorizer::new(oauth.clone(), config.auth.return_method);
        let store = FileTokenStore::new(&config.cache_file);

        tracing::debug!(
            "Using client secret {:?}, token cache {:?}, return method {}",
            config.credentials_file,
            config.cache_file,
            config.auth.return_method
        );

        let credentials = CredentialManager::new(
            Arc::new(store),
            Arc::new(authorizer),
            Arc::new(oauth),
            config.scopes.clone(),
        );

        Ok(Self::from_parts(config, http, credentials))
    }

    /// Assemble from pre-built parts (custom stores or authorizers)
    pub fn from_parts(config: Config, http: HttpClient, credentials: CredentialManager) -> Self {
        Self {
            config,
            http,
            credentials,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Make sure a usable credential exists, re-authorizing from scratch with `force`
    pub async fn authenticate(&self, force: bool, cancel: &CancellationToken) -> Result<Credential> {
        if force {
            tracing::info!("Discarding cached credential");
            self.credentials.invalidate().await?;
        }
        let source = self.credentials.token_source(cancel).await?;
        source.credential(cancel).await
    }

    pub async fn drive(&self, cancel: &CancellationToken) -> Result<DriveCollection> {
        let tokens = self.credentials.token_source(cancel).await?;
        Ok(DriveCollection::new(
            self.http.clone(),
            tokens,
            &self.config.http.drive_base_url,
            &self.config.http.drive_root_url,
        ))
    }

    pub async fn mail(&self, cancel: &CancellationToken) -> Result<GmailCollection> {
        let tokens = self.credentials.token_source(cancel).await?;
        Ok(GmailCollection::new(
            self.http.clone(),
            tokens,
            &self.config.http.gmail_base_url,
        )
        .with_concurrency(self.config.mail.metadata_concurrency))
    }

    pub async fn search_drive(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<crate::models::DocumentSummary>> {
        let client = PaginatedSearchClient::new(self.drive(cancel).await?);
        client.search(query, cancel).await
    }

    pub async fn search_mail(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<crate::models::MessageSummary>> {
        let client = PaginatedSearchClient::new(self.mail(cancel).await?);
        client.search(query, cancel).await
    }
}
