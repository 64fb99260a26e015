//! Error types for remote calls and sync runs

/// Failure of a single Gmail API call, before any retry decision
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The API answered with a non-success HTTP status
    #[error("Gmail API returned HTTP {code}")]
    Status { code: u16 },
    /// Connection, DNS, TLS or timeout failure
    #[error("Gmail API transport error: {0}")]
    Transport(String),
    /// The response body did not match the expected shape
    #[error("Failed to decode Gmail API response: {0}")]
    Decode(String),
    /// No usable access token
    #[error("Gmail authentication failed: {0}")]
    Auth(String),
    /// The request could not be built or sent
    #[error("Gmail API request failed: {0}")]
    Request(String),
}

impl RemoteError {
    /// HTTP status code, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<ureq::Error> for RemoteError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => RemoteError::Status { code },
            ureq::Error::Json(e) => RemoteError::Decode(e.to_string()),
            ureq::Error::Io(_)
            | ureq::Error::Timeout(_)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound => RemoteError::Transport(err.to_string()),
            other => RemoteError::Request(other.to_string()),
        }
    }
}

/// How the retry wrapper treats a [`RemoteError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// HTTP 429
    RateLimited,
    /// 5xx or a dropped connection
    TransientServer,
    /// The history cursor is too old (404 from the history endpoint)
    CursorExpired,
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::TransientServer)
    }
}

/// Error that ends a sync run (or, for `CursorExpired`, triggers a full resync)
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(RemoteError),

    #[error("Gmail API retry limit exceeded after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: RemoteError },

    #[error("History ID expired or invalid")]
    CursorExpired,

    #[error("Sync state persistence failed: {0:#}")]
    Persistence(#[from] anyhow::Error),
}
