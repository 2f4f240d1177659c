//! Interactive OAuth2 authorization-code flow for installed applications

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, GctlError, Result};
use crate::models::Credential;
use crate::oauth::OAuthClient;

/// Obtains a fresh credential with the user in the loop
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    /// Run one complete authorization flow for `scopes`.
    ///
    /// Every call starts from scratch; nothing is carried over from earlier calls.
    async fn authorize(&self, scopes: &[String], cancel: &CancellationToken) -> Result<Credential>;
}

/// How the authorization code gets back to us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReturnMethod {
    /// One-shot HTTP listener on 127.0.0.1 receives the redirect
    #[default]
    Loopback,
    /// The user pastes the code (or the redirected URL) into the terminal
    Manual,
}

impl FromStr for ReturnMethod {
    type Err = GctlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "loopback" => Ok(ReturnMethod::Loopback),
            "manual" => Ok(ReturnMethod::Manual),
            other => Err(GctlError::ConfigError(format!(
                "Invalid auth.return_method: '{}'. Must be 'loopback' or 'manual'",
                other
            ))),
        }
    }
}

impl fmt::Display for ReturnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnMethod::Loopback => write!(f, "loopback"),
            ReturnMethod::Manual => write!(f, "manual"),
        }
    }
}

/// Shows the consent URL to the user
pub type UrlPresenter = Arc<dyn Fn(&str) + Send + Sync>;

fn present_on_stderr(url: &str) {
    eprintln!("Open the following URL in your browser to authorize gctl:\n\n{}\n", url);
}

/// What arrived on the redirect listener
#[derive(Debug, Clone, PartialEq, Eq)]
enum Redirect {
    Code(String),
    Denied(String),
    Invalid(String),
    /// Browser noise such as /favicon.ico
    Unrelated,
}

/// Authorizer for Google "installed application" OAuth clients
pub struct InstalledFlowAuthorizer {
    oauth: OAuthClient,
    method: ReturnMethod,
    timeout: Duration,
    presenter: UrlPresenter,
}

impl InstalledFlowAuthorizer {
    pub fn new(oauth: OAuthClient, method: ReturnMethod) -> Self {
        Self {
            oauth,
            method,
            timeout: Duration::from_secs(300),
            presenter: Arc::new(present_on_stderr),
        }
    }

    /// How long to wait for the user before giving up
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace how the consent URL is shown
    pub fn with_presenter(mut self, presenter: UrlPresenter) -> Self {
        self.presenter = presenter;
        self
    }

    async fn receive_code(
        &self,
        state: &str,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<(String, String)> {
        match self.method {
            ReturnMethod::Loopback => {
                let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(|e| {
                    AuthError::Network(format!("failed to start redirect listener: {}", e))
                })?;
                let port = listener.local_addr()?.port();
                let redirect_uri = format!("http://127.0.0.1:{}", port);

                let url = self.oauth.consent_url(scopes, &redirect_uri, state)?;
                tracing::info!("Waiting for OAuth redirect on port {}", port);
                (self.presenter)(&url);

                let code = self.wait_or_cancel(wait_for_redirect(&listener, state), cancel).await?;
                Ok((code, redirect_uri))
            }
            ReturnMethod::Manual => {
                let redirect_uri = self
                    .oauth
                    .secret()
                    .redirect_uris
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "http://localhost".to_string());

                let url = self.oauth.consent_url(scopes, &redirect_uri, state)?;
                (self.presenter)(&url);

                let state = state.to_string();
                let code = self
                    .wait_or_cancel(
                        async move {
                            let pasted = tokio::task::spawn_blocking(prompt_for_code)
                                .await
                                .map_err(|e| {
                                    AuthError::Network(format!("code prompt failed: {}", e))
                                })??;
                            code_from_pasted(&pasted, &state)
                        },
                        cancel,
                    )
                    .await?;
                Ok((code, redirect_uri))
            }
        }
    }

    async fn wait_or_cancel<F>(&self, fut: F, cancel: &CancellationToken) -> Result<String>
    where
        F: std::future::Future<Output = Result<String>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GctlError::Cancelled("interactive authorization".to_string())),
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(code) => code,
                Err(_) => Err(AuthError::UserCancelled(format!(
                    "no authorization received within {:?}",
                    self.timeout
                ))
                .into()),
            },
        }
    }
}

#[async_trait]
impl InteractiveAuthorizer for InstalledFlowAuthorizer {
    async fn authorize(&self, scopes: &[String], cancel: &CancellationToken) -> Result<Credential> {
        let state = uuid::Uuid::new_v4().to_string();
        tracing::info!("Starting interactive authorization ({} method)", self.method);

        let (code, redirect_uri) = self.receive_code(&state, scopes, cancel).await?;
        self.oauth
            .exchange_code(&code, &redirect_uri, scopes, cancel)
            .await
    }
}

fn prompt_for_code() -> Result<String> {
    inquire::Text::new("Paste the authorization code (or the full redirected URL):")
        .prompt()
        .map_err(|e| match e {
            inquire::InquireError::OperationCanceled
            | inquire::InquireError::OperationInterrupted => {
                AuthError::UserCancelled("code prompt aborted".to_string()).into()
            }
            other => GctlError::from(AuthError::Network(format!("code prompt failed: {}", other))),
        })
}

/// Accept either a bare code or the URL the browser was redirected to
fn code_from_pasted(pasted: &str, state: &str) -> Result<String> {
    let pasted = pasted.trim();
    if pasted.is_empty() {
        return Err(AuthError::UserCancelled("no code entered".to_string()).into());
    }
    if !pasted.contains("code=") && !pasted.contains("error=") {
        return Ok(pasted.to_string());
    }
    let target = match url::Url::parse(pasted) {
        Ok(url) => format!("/?{}", url.query().unwrap_or("")),
        Err(_) => format!("/?{}", pasted.trim_start_matches('?')),
    };
    redirect_result(parse_redirect(&target, state))
        .and_then(|code| code.ok_or_else(|| AuthError::Network("no code in pasted URL".to_string()).into()))
}

/// Map a redirect to a code, an error, or `None` for unrelated requests
fn redirect_result(redirect: Redirect) -> Result<Option<String>> {
    match redirect {
        Redirect::Code(code) => Ok(Some(code)),
        Redirect::Denied(reason) if reason == "access_denied" => {
            Err(AuthError::UserCancelled("consent was denied".to_string()).into())
        }
        Redirect::Denied(reason) => {
            Err(AuthError::Network(format!("authorization server returned {}", reason)).into())
        }
        Redirect::Invalid(reason) => Err(AuthError::Network(reason).into()),
        Redirect::Unrelated => Ok(None),
    }
}

/// Classify the request target of a redirect hitting the listener
fn parse_redirect(target: &str, expected_state: &str) -> Redirect {
    let url = match url::Url::parse(&format!("http://127.0.0.1{}", target)) {
        Ok(url) => url,
        Err(_) => return Redirect::Unrelated,
    };
    if url.path() != "/" {
        return Redirect::Unrelated;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Redirect::Denied(error);
    }
    match code {
        Some(_) if state.as_deref() != Some(expected_state) => {
            Redirect::Invalid("state mismatch in OAuth redirect".to_string())
        }
        Some(code) => Redirect::Code(code),
        None => Redirect::Unrelated,
    }
}

/// Serve the redirect listener until a code or an error arrives.
///
/// Each connection gets its own one-request hyper server, so an idle
/// browser preconnect cannot hold up the real redirect.
async fn wait_for_redirect(listener: &TcpListener, state: &str) -> Result<String> {
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<Result<String>>(1);

    loop {
        tokio::select! {
            biased;
            Some(outcome) = outcome_rx.recv() => return outcome,
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| {
                    AuthError::Network(format!("redirect listener failed: {}", e))
                })?;
                tracing::debug!("OAuth redirect connection from {}", peer);

                let state = state.to_string();
                let outcomes = outcome_tx.clone();
                let service = service_fn(move |request: Request<Incoming>| {
                    let response = answer_redirect(&request, &state, &outcomes);
                    async move { Ok::<_, Infallible>(response) }
                });

                // Detached so the final response is still written after we return
                tokio::spawn(async move {
                    if let Err(e) = http1::Builder::new()
                        .keep_alive(false)
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!("Redirect connection from {} failed: {}", peer, e);
                    }
                });
            }
        }
    }
}

/// Answer one request on the redirect listener, forwarding any code or error
fn answer_redirect(
    request: &Request<Incoming>,
    state: &str,
    outcomes: &mpsc::Sender<Result<String>>,
) -> Response<Full<Bytes>> {
    if request.method() != Method::GET {
        return redirect_page(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.");
    }

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let outcome = redirect_result(parse_redirect(target, state));
    let (status, message) = match &outcome {
        Ok(Some(_)) => (
            StatusCode::OK,
            "Authorization complete. You can close this window.",
        ),
        Ok(None) => (StatusCode::NOT_FOUND, "Not found."),
        Err(_) => (
            StatusCode::BAD_REQUEST,
            "Authorization failed. Return to the terminal.",
        ),
    };

    let forwarded = match outcome {
        Ok(Some(code)) => Some(Ok(code)),
        Ok(None) => None,
        Err(e) => Some(Err(e)),
    };
    if let Some(result) = forwarded {
        // Only the first outcome counts
        if outcomes.try_send(result).is_err() {
            tracing::debug!("Ignoring a second OAuth redirect");
        }
    }

    redirect_page(status, message)
}

fn redirect_page(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = format!("<html><body><p>{}</p></body></html>", message);
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
