use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Result with GctlError
pub type Result<T> = std::result::Result<T, GctlError>;

/// Top-level error type for gctl
#[derive(Error, Debug)]
pub enum GctlError {
    /// Missing or invalid configuration (client secret file, config values)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(#[from] AuthError),

    /// A call against Drive or Gmail failed
    #[error("Remote call failed: {0}")]
    RemoteError(#[from] RemoteError),

    /// Token cache could not be read or written
    #[error("Token cache error: {0}")]
    CacheError(#[from] CacheError),

    /// The caller's cancellation token fired
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Import created the document but could not upload its content.
    /// The empty document is left in Drive.
    #[error("Created document {resource_id} but failed to upload its content: {source}")]
    PartialImport {
        resource_id: String,
        #[source]
        source: RemoteError,
    },

    /// A successful response whose body did not match the expected schema
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl GctlError {
    /// Check if the error is transient and the caller may retry
    pub fn is_transient(&self) -> bool {
        match self {
            GctlError::RemoteError(e) => e.is_transient(),
            GctlError::AuthError(AuthError::Network(_)) => true,
            _ => false,
        }
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Authentication failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The user declined consent or aborted the prompt
    #[error("authorization cancelled by user: {0}")]
    UserCancelled(String),

    /// The interactive flow or token endpoint could not be reached
    #[error("network error during authorization: {0}")]
    Network(String),

    /// The refresh token was rejected (revoked or expired)
    #[error("token refresh rejected: {0}")]
    RefreshFailed(String),

    /// No further automatic recovery is possible; re-run `gctl auth --force`
    #[error("credentials unusable: {0}")]
    Terminal(String),
}

/// Token cache failures
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no cached credential at {0:?}")]
    NotFound(PathBuf),

    #[error("cached credential at {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Position of a failing request within a paginated search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    /// 1-based page number within this search
    pub number: usize,
    /// Page token the failing request was sent with
    pub page_token: Option<String>,
}

/// How a remote call failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// No structured body: connection failure, timeout, or an unparseable error response
    Transport(String),
    /// The API answered with a machine-readable error body
    Api { status: u16, body: String },
}

/// Remote call failure with the page/resource it happened on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub page: Option<PageContext>,
    pub resource_id: Option<String>,
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transport(message.into()),
            page: None,
            resource_id: None,
        }
    }

    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Api {
                status,
                body: body.into(),
            },
            page: None,
            resource_id: None,
        }
    }

    /// Attach the page this error happened on
    pub fn on_page(mut self, number: usize, page_token: Option<&str>) -> Self {
        self.page = Some(PageContext {
            number,
            page_token: page_token.map(str::to_string),
        });
        self
    }

    /// Attach the resource (file or message id) this error happened on
    pub fn for_resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn is_api_error(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Api { .. })
    }

    /// Transport failures may succeed on retry; API errors will not
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Transport(_))
    }

    /// Raw error body for API errors
    pub fn body(&self) -> Option<&str> {
        match &self.kind {
            RemoteErrorKind::Api { body, .. } => Some(body),
            RemoteErrorKind::Transport(_) => None,
        }
    }

    /// Google's `error.errors[0].reason` (e.g. `quotaExceeded`), if present
    pub fn api_reason(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(self.body()?).ok()?;
        value
            .pointer("/error/errors/0/reason")
            .or_else(|| value.pointer("/error/status"))
            .and_then(|r| r.as_str())
            .map(str::to_string)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RemoteErrorKind::Transport(message) => write!(f, "transport failure: {}", message)?,
            RemoteErrorKind::Api { status, body } => {
                write!(f, "API returned HTTP {}: {}", status, body)?
            }
        }
        if let Some(page) = &self.page {
            write!(f, " (page {}", page.number)?;
            if let Some(token) = &page.page_token {
                write!(f, ", page token {}", token)?;
            }
            write!(f, ")")?;
        }
        if let Some(id) = &self.resource_id {
            write!(f, " (resource {})", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

// google-drive3 and google-gmail1 share google-apis-common, so this covers both hubs
impl From<google_gmail1::Error> for GctlError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // Non-2xx response whose body parsed as JSON
            google_gmail1::Error::BadRequest(body) => {
                let status = body
                    .pointer("/error/code")
                    .and_then(|c| c.as_u64())
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or(400);
                RemoteError::api(status, body.to_string()).into()
            }
            // Non-2xx response without a JSON body
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                RemoteError::transport(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ))
                .into()
            }
            google_gmail1::Error::HttpError(ref err) => {
                RemoteError::transport(format!("Connection error: {}", err)).into()
            }
            google_gmail1::Error::Io(err) => RemoteError::transport(err.to_string()).into(),
            google_gmail1::Error::JsonDecodeError(_, err) => {
                GctlError::InvalidResponse(format!("unexpected response body: {}", err))
            }
            _ => RemoteError::transport(error.to_string()).into(),
        }
    }
}
