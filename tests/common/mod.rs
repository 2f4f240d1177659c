//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gctl::authorizer::InteractiveAuthorizer;
use gctl::credentials::CredentialManager;
use gctl::error::{CacheError, GctlError, RemoteError, Result};
use gctl::models::{Credential, ResultPage};
use gctl::oauth::TokenRefresher;
use gctl::search::RemoteCollection;
use gctl::token_store::TokenStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

pub fn scopes() -> Vec<String> {
    vec![DRIVE_SCOPE.to_string()]
}

/// Create a credential for the test scope expiring `expires_in` seconds from now
pub fn credential(access: &str, refresh: Option<&str>, expires_in: i64) -> Credential {
    Credential {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expiry: Utc::now() + Duration::seconds(expires_in),
        scopes: [DRIVE_SCOPE.to_string()].into_iter().collect(),
    }
}

/// In-memory token store that counts writes
#[derive(Default)]
pub struct MemoryStore {
    credential: Mutex<Option<Credential>>,
    corrupt: Mutex<bool>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with(credential: Credential) -> Self {
        let store = Self::default();
        *store.credential.lock().unwrap() = Some(credential);
        store
    }

    /// Store whose record fails to parse until overwritten
    pub fn corrupt() -> Self {
        let store = Self::default();
        *store.corrupt.lock().unwrap() = true;
        store
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<Credential> {
        self.credential.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn load(&self) -> std::result::Result<Credential, CacheError> {
        if *self.corrupt.lock().unwrap() {
            return Err(CacheError::Corrupt {
                path: "memory".into(),
                reason: "expected value at line 1 column 1".to_string(),
            });
        }
        self.credential
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CacheError::NotFound("memory".into()))
    }

    async fn save(&self, credential: &Credential) -> std::result::Result<(), CacheError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.corrupt.lock().unwrap() = false;
        *self.credential.lock().unwrap() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> std::result::Result<(), CacheError> {
        *self.corrupt.lock().unwrap() = false;
        *self.credential.lock().unwrap() = None;
        Ok(())
    }
}

/// Authorizer that replays scripted outcomes and counts calls
#[derive(Default)]
pub struct ScriptedAuthorizer {
    outcomes: Mutex<VecDeque<Result<Credential>>>,
    calls: AtomicUsize,
}

impl ScriptedAuthorizer {
    pub fn new(outcomes: Vec<Result<Credential>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn granting(credential: Credential) -> Self {
        Self::new(vec![Ok(credential)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveAuthorizer for ScriptedAuthorizer {
    async fn authorize(&self, _scopes: &[String], _cancel: &CancellationToken) -> Result<Credential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GctlError::ConfigError("authorizer script exhausted".to_string())))
    }
}

/// Refresher that replays scripted outcomes and counts calls
#[derive(Default)]
pub struct ScriptedRefresher {
    outcomes: Mutex<VecDeque<Result<Credential>>>,
    calls: AtomicUsize,
}

impl ScriptedRefresher {
    pub fn new(outcomes: Vec<Result<Credential>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(&self, _credential: &Credential, _cancel: &CancellationToken) -> Result<Credential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GctlError::ConfigError("refresher script exhausted".to_string())))
    }
}

pub fn manager(
    store: Arc<MemoryStore>,
    authorizer: Arc<ScriptedAuthorizer>,
    refresher: Arc<dyn TokenRefresher>,
) -> CredentialManager {
    CredentialManager::new(store, authorizer, refresher, scopes())
}

/// One scripted page: items plus the token for the next page, or an error
pub type PageOutcome = std::result::Result<(Vec<String>, Option<String>), RemoteError>;

/// Remote collection that requires a live token for every page, like the real adapters
pub struct FakeCollection {
    manager: CredentialManager,
    pages: Mutex<VecDeque<PageOutcome>>,
    tokens_seen: Mutex<Vec<String>>,
}

impl FakeCollection {
    pub fn new(manager: CredentialManager, pages: Vec<PageOutcome>) -> Self {
        Self {
            manager,
            pages: Mutex::new(pages.into()),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }

    pub fn pages_left(&self) -> usize {
        self.pages.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteCollection for FakeCollection {
    type Item = String;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn max_page_size(&self) -> usize {
        100
    }

    async fn fetch_page(
        &self,
        _query: &str,
        _page_size: usize,
        _page_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage<String>> {
        let token = self.manager.token_source(cancel).await?.token(cancel).await?;
        self.tokens_seen.lock().unwrap().push(token);

        let outcome = self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok((Vec::new(), None)));
        let (items, next) = outcome?;
        Ok(ResultPage::new(items, next))
    }
}

pub fn items(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
