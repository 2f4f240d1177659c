//! Shared HTTPS transport for the OAuth endpoint and the Drive/Gmail hubs

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{GctlError, RemoteError, Result};

/// Connector shared by every client built from an [`HttpClient`]
pub type Connector = HttpsConnector<HttpConnector>;

/// Type alias for the hyper client to simplify type signatures
pub type HttpsClient = Client<Connector, Full<Bytes>>;

/// Install the process-wide rustls crypto provider.
///
/// Safe to call repeatedly; only the first call has an effect.
pub fn install_crypto_provider() {
    // On non-Windows platforms, use aws-lc-rs
    // On Windows, use ring
    #[cfg(not(windows))]
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    #[cfg(windows)]
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into a classified remote error.
    ///
    /// A JSON body makes it an API error; anything else is a transport failure.
    pub fn error_for_status(self) -> std::result::Result<Self, RemoteError> {
        if self.is_success() {
            return Ok(self);
        }
        if serde_json::from_slice::<serde_json::Value>(&self.body).is_ok() {
            return Err(RemoteError::api(self.status.as_u16(), self.text()));
        }
        Err(RemoteError::transport(format!(
            "HTTP {} {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown")
        )))
    }

    /// Deserialize a 2xx JSON body
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            GctlError::InvalidResponse(format!("unexpected response body: {}", e))
        })
    }
}

/// HTTPS client with a per-request timeout and cancellation
#[derive(Clone)]
pub struct HttpClient {
    connector: Connector,
    client: HttpsClient,
    timeout: Duration,
}

impl HttpClient {
    /// Build the client with native TLS roots.
    ///
    /// Plain `http://` is allowed so endpoints can point at a local server.
    pub fn new(timeout: Duration) -> Result<Self> {
        install_crypto_provider();

        let builder = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                // https requests will fail certificate checks; plain http still works
                tracing::warn!("No native TLS roots available ({}); HTTPS will fail", e);
                let tls = rustls::ClientConfig::builder()
                    .with_root_certificates(rustls::RootCertStore::empty())
                    .with_no_client_auth();
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls)
            }
        };
        let connector = builder.https_or_http().enable_http1().build();
        let client = Client::builder(TokioExecutor::new()).build(connector.clone());

        Ok(Self {
            connector,
            client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A client over the same TLS connector, with whatever body type a generated hub needs
    pub fn api_client<B>(&self) -> Client<Connector, B>
    where
        B: hyper::body::Body + Send,
        B::Data: Send,
    {
        Client::builder(TokioExecutor::new()).build(self.connector.clone())
    }

    /// Await a generated hub call under the request timeout and the caller's token.
    ///
    /// The raw response is dropped; only the decoded value is returned.
    pub async fn call<F, R, T, E>(&self, what: &str, call: F, cancel: &CancellationToken) -> Result<T>
    where
        F: Future<Output = std::result::Result<(R, T), E>>,
        GctlError: From<E>,
    {
        tracing::debug!("{}", what);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GctlError::Cancelled(what.to_string())),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(Ok((_, value))) => Ok(value),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(RemoteError::transport(format!(
                    "{} timed out after {:?}",
                    what, self.timeout
                ))
                .into()),
            },
        }
    }

    /// Send a request and read the whole response body.
    ///
    /// Non-2xx statuses are returned as-is; callers classify them.
    pub async fn execute(
        &self,
        request: Request<Full<Bytes>>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let method = request.method().clone();
        let uri = request.uri().clone();
        tracing::debug!("{} {}{}", method, uri.host().unwrap_or(""), uri.path());

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| RemoteError::transport(format!("{} {}: {}", method, uri.path(), e)))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| {
                    RemoteError::transport(format!("reading response body failed: {}", e))
                })?
                .to_bytes();
            Ok::<_, RemoteError>(HttpResponse { status, body })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GctlError::Cancelled(format!("{} {}", method, uri.path()))),
            result = tokio::time::timeout(self.timeout, exchange) => match result {
                Ok(Ok(response)) => {
                    tracing::debug!("{} {} -> {}", method, uri.path(), response.status);
                    Ok(response)
                }
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(RemoteError::transport(format!(
                    "{} {} timed out after {:?}",
                    method,
                    uri.path(),
                    self.timeout
                ))
                .into()),
            },
        }
    }
}

/// Generated hubs append paths to their base URLs verbatim
pub fn hub_url(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}

/// Build a request with an optional bearer token and body
pub fn build_request(
    method: Method,
    url: &url::Url,
    bearer: Option<&str>,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(url.as_str())
        .header(header::ACCEPT, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Full::new(body))
        .map_err(|e| GctlError::ConfigError(format!("Invalid request for {}: {}", url, e)))
}
