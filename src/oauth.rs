//! OAuth2 token endpoint client: authorization-code exchange and refresh

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use hyper::Method;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use yup_oauth2::ApplicationSecret;

use crate::error::{AuthError, GctlError, RemoteErrorKind, Result};
use crate::http::{build_request, HttpClient};
use crate::models::Credential;

/// Drive scope (full access, needed for import)
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Gmail read-only scope
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Scopes requested when the configuration does not name any
pub const DEFAULT_SCOPES: &[&str] = &[GMAIL_READONLY_SCOPE, DRIVE_SCOPE];

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Exchanges a refresh token for a new access token without user interaction
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh `credential`.
    ///
    /// Fails with `AuthError::RefreshFailed` when the grant was rejected and
    /// `AuthError::Network` when the endpoint could not be reached.
    async fn refresh(&self, credential: &Credential, cancel: &CancellationToken)
        -> Result<Credential>;
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// RFC 6749 §5.2 error response
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(d) => format!("{}: {}", self.error, d),
            None => self.error.clone(),
        }
    }
}

/// Load the OAuth client secret (Google's `installed`/`web` JSON format)
pub async fn load_application_secret(path: &Path) -> Result<ApplicationSecret> {
    if !path.exists() {
        return Err(GctlError::ConfigError(format!(
            "OAuth client secret file not found at {:?}",
            path
        )));
    }
    yup_oauth2::read_application_secret(path)
        .await
        .map_err(|e| {
            GctlError::ConfigError(format!("Failed to read credentials from {:?}: {}", path, e))
        })
}

/// Client for the OAuth2 token endpoint
#[derive(Clone)]
pub struct OAuthClient {
    secret: ApplicationSecret,
    http: HttpClient,
}

impl OAuthClient {
    pub fn new(secret: ApplicationSecret, http: HttpClient) -> Self {
        Self { secret, http }
    }

    /// Read the client secret file and build the client
    pub async fn from_secret_file(path: &Path, http: HttpClient) -> Result<Self> {
        let secret = load_application_secret(path).await?;
        Ok(Self::new(secret, http))
    }

    pub fn secret(&self) -> &ApplicationSecret {
        &self.secret
    }

    /// Consent URL for the authorization-code flow.
    ///
    /// Requests offline access and forces the consent screen so a refresh
    /// token is issued even if the user approved this client before.
    pub fn consent_url(&self, scopes: &[String], redirect_uri: &str, state: &str) -> Result<String> {
        let url = url::Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scopes.join(" ").as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| {
            GctlError::ConfigError(format!("Invalid auth_uri {:?}: {}", self.secret.auth_uri, e))
        })?;
        Ok(url.into())
    }

    /// Redeem an authorization code for an access + refresh token pair
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
        ];

        let response = self
            .post_form(&form, cancel)
            .await?
            .map_err(|e| AuthError::Network(format!("code exchange rejected: {}", e)))?;

        let requested: BTreeSet<String> = scopes.iter().cloned().collect();
        let credential = credential_from_response(response, None, requested);
        tracing::info!(
            "Authorization code exchanged (refresh token issued: {})",
            credential.can_refresh()
        );
        Ok(credential)
    }

    /// POST a form to the token endpoint.
    ///
    /// The outer result carries cancellation and transport failures; the inner
    /// one carries a rejection by the endpoint.
    async fn post_form(
        &self,
        form: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<TokenResponse, String>> {
        let token_uri = url::Url::parse(&self.secret.token_uri).map_err(|e| {
            GctlError::ConfigError(format!("Invalid token_uri {:?}: {}", self.secret.token_uri, e))
        })?;
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();
        let request = build_request(
            Method::POST,
            &token_uri,
            None,
            Some("application/x-www-form-urlencoded"),
            Bytes::from(body),
        )?;

        let response = match self.http.execute(request, cancel).await {
            Ok(response) => response,
            Err(GctlError::RemoteError(e)) => {
                return Err(AuthError::Network(e.to_string()).into());
            }
            Err(e) => return Err(e),
        };

        if response.is_success() {
            let token = response.json::<TokenResponse>()?;
            return Ok(Ok(token));
        }

        if let Ok(err) = serde_json::from_slice::<TokenErrorResponse>(&response.body) {
            return Ok(Err(err.describe()));
        }
        let status = response.status;
        match response.error_for_status() {
            Err(e) if matches!(e.kind, RemoteErrorKind::Transport(_)) => {
                Err(AuthError::Network(e.to_string()).into())
            }
            Err(e) => Ok(Err(e.to_string())),
            Ok(_) => Ok(Err(format!("token endpoint returned HTTP {}", status))),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token".to_string()))?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
        ];

        let response = self
            .post_form(&form, cancel)
            .await?
            .map_err(AuthError::RefreshFailed)?;

        Ok(credential_from_response(
            response,
            Some(credential),
            credential.scopes.clone(),
        ))
    }
}

/// Build a credential, keeping the previous refresh token and scopes when
/// the endpoint does not return new ones.
fn credential_from_response(
    response: TokenResponse,
    previous: Option<&Credential>,
    fallback_scopes: BTreeSet<String>,
) -> Credential {
    let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    let scopes = match response.scope.as_deref() {
        Some(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
        _ => fallback_scopes,
    };
    let refresh_token = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous.and_then(|p| p.refresh_token.clone()));

    Credential {
        access_token: response.access_token,
        refresh_token,
        expiry: Utc::now() + Duration::seconds(expires_in),
        scopes,
    }
}
