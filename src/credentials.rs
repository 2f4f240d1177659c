//! Credential lifecycle: load, authorize, refresh, persist
//!
//! [`CredentialManager`] owns the credential and walks it through
//! `Empty → Loading → {Valid, NeedsRefresh, NeedsAuthorization} → Valid`,
//! ending in `Failed` when neither refresh nor authorization can produce a
//! usable token. Consumers only ever see a [`TokenSource`].

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::authorizer::InteractiveAuthorizer;
use crate::error::{AuthError, CacheError, GctlError, Result};
use crate::models::Credential;
use crate::oauth::TokenRefresher;
use crate::token_store::TokenStore;

/// Internal lifecycle state
#[derive(Debug, Clone)]
enum CredentialState {
    Empty,
    Valid(Credential),
    NeedsRefresh(Credential),
    NeedsAuthorization,
    Failed(String),
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialState::Empty => "empty",
            CredentialState::Valid(_) => "valid",
            CredentialState::NeedsRefresh(_) => "needs-refresh",
            CredentialState::NeedsAuthorization => "needs-authorization",
            CredentialState::Failed(_) => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Why authorization is being attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthorizationCause {
    Initial,
    RefreshFallback,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    authorizer: Arc<dyn InteractiveAuthorizer>,
    refresher: Arc<dyn TokenRefresher>,
    scopes: Vec<String>,
    state: Mutex<CredentialState>,
}

/// Produces live access tokens from the cache, a refresh, or the user
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

/// Handle that yields a current access token for every remote call
#[derive(Clone)]
pub struct TokenSource {
    inner: Arc<Inner>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        authorizer: Arc<dyn InteractiveAuthorizer>,
        refresher: Arc<dyn TokenRefresher>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                authorizer,
                refresher,
                scopes,
                state: Mutex::new(CredentialState::Empty),
            }),
        }
    }

    /// Bring the credential to a usable state and hand out a token source.
    ///
    /// Only touches the network or the cache when the current credential is
    /// missing or expired.
    pub async fn token_source(&self, cancel: &CancellationToken) -> Result<TokenSource> {
        self.inner.current(cancel).await?;
        Ok(TokenSource {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Drop any cached credential so the next use re-authorizes
    pub async fn invalidate(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.store.clear().await?;
        *state = CredentialState::NeedsAuthorization;
        Ok(())
    }

    pub fn scopes(&self) -> &[String] {
        &self.inner.scopes
    }
}

impl TokenSource {
    /// Current access token, refreshed or re-authorized first if it expired
    pub async fn token(&self, cancel: &CancellationToken) -> Result<String> {
        Ok(self.inner.current(cancel).await?.access_token)
    }

    /// Current credential (expiry and scopes included)
    pub async fn credential(&self, cancel: &CancellationToken) -> Result<Credential> {
        self.inner.current(cancel).await
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("scopes", &self.inner.scopes)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Drive the state machine until it yields a valid credential or fails.
    ///
    /// The state lock is held for the whole walk so refresh-then-save and
    /// authorize-then-save are never interleaved with another caller.
    async fn current(&self, cancel: &CancellationToken) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let mut cause = AuthorizationCause::Initial;

        loop {
            tracing::trace!("Credential state: {}", *state);
            match std::mem::replace(&mut *state, CredentialState::Empty) {
                CredentialState::Empty => {
                    *state = self.load().await?;
                }
                CredentialState::Valid(credential) => {
                    if !credential.is_expired_at(Utc::now()) {
                        *state = CredentialState::Valid(credential.clone());
                        return Ok(credential);
                    }
                    tracing::debug!("Access token expired at {}", credential.expiry);
                    *state = if credential.can_refresh() {
                        CredentialState::NeedsRefresh(credential)
                    } else {
                        CredentialState::NeedsAuthorization
                    };
                }
                CredentialState::NeedsRefresh(credential) => {
                    match self.refresher.refresh(&credential, cancel).await {
                        Ok(refreshed) => {
                            tracing::info!("Refreshed access token (expires {})", refreshed.expiry);
                            *state = CredentialState::Valid(refreshed.clone());
                            self.persist(&refreshed).await?;
                            return Ok(refreshed);
                        }
                        Err(GctlError::AuthError(AuthError::RefreshFailed(reason))) => {
                            tracing::warn!(
                                "Token refresh rejected ({}); falling back to interactive authorization",
                                reason
                            );
                            cause = AuthorizationCause::RefreshFallback;
                            *state = CredentialState::NeedsAuthorization;
                        }
                        Err(e) => {
                            // cancellation and transport failures keep the old credential
                            *state = CredentialState::NeedsRefresh(credential);
                            return Err(e);
                        }
                    }
                }
                CredentialState::NeedsAuthorization => {
                    match self.authorizer.authorize(&self.scopes, cancel).await {
                        Ok(credential) => {
                            tracing::info!(
                                "Authorization succeeded (expires {})",
                                credential.expiry
                            );
                            *state = CredentialState::Valid(credential.clone());
                            self.persist(&credential).await?;
                            // fresh grants are handed out as-is, even with a short expiry
                            return Ok(credential);
                        }
                        Err(GctlError::Cancelled(what)) => {
                            *state = CredentialState::NeedsAuthorization;
                            return Err(GctlError::Cancelled(what));
                        }
                        Err(e) => {
                            tracing::error!("Authorization failed: {}", e);
                            *state = CredentialState::Failed(e.to_string());
                            return Err(match cause {
                                AuthorizationCause::Initial => e,
                                AuthorizationCause::RefreshFallback => AuthError::Terminal(format!(
                                    "re-authorization after refresh failure also failed: {}",
                                    e
                                ))
                                .into(),
                            });
                        }
                    }
                }
                CredentialState::Failed(reason) => {
                    *state = CredentialState::Failed(reason.clone());
                    return Err(AuthError::Terminal(reason).into());
                }
            }
        }
    }

    /// Loading: decide the first real state from the cache.
    ///
    /// A cache that exists but cannot be read is an error; the state stays
    /// `Empty` so a later call loads again.
    async fn load(&self) -> Result<CredentialState> {
        let credential = match self.store.load().await {
            Ok(credential) => credential,
            Err(CacheError::NotFound(path)) => {
                tracing::info!("No cached credential at {:?}; authorization required", path);
                return Ok(CredentialState::NeedsAuthorization);
            }
            Err(CacheError::Corrupt { path, reason }) => {
                tracing::warn!(
                    "Cached credential at {:?} is corrupt ({}); it may have been tampered with. Re-authorizing",
                    path,
                    reason
                );
                return Ok(CredentialState::NeedsAuthorization);
            }
            Err(e) => {
                tracing::error!("Failed to read cached credential: {}", e);
                return Err(e.into());
            }
        };

        if !credential.scopes.is_empty() && !credential.covers(&self.scopes) {
            tracing::warn!(
                "Cached credential was granted fewer scopes than configured; run `gctl auth --force` to grant the rest"
            );
        }
        if !credential.is_expired_at(Utc::now()) {
            return Ok(CredentialState::Valid(credential));
        }
        if credential.can_refresh() {
            Ok(CredentialState::NeedsRefresh(credential))
        } else {
            tracing::info!("Cached credential expired and cannot be refreshed");
            Ok(CredentialState::NeedsAuthorization)
        }
    }

    async fn persist(&self, credential: &Credential) -> Result<()> {
        self.store.save(credential).await.map_err(|e| {
            tracing::error!("Failed to persist credential: {}", e);
            GctlError::from(e)
        })?;
        tracing::info!("Cached credential updated");
        Ok(())
    }
}
