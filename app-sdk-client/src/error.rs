//! Error handling in the client layer.
use app_sdk_core::Status;
use thiserror::Error;

/// Possible errors from API clients.
#[derive(Error, Debug)]
pub enum Error {
    /// The API server answered a request with a Kubernetes `Status` failure.
    ///
    /// When the Status body carries its own `code` it takes precedence over
    /// the transport status line; the raw HTTP code is only surfaced through
    /// [`Error::ServerResponse`] when no Status could be parsed.
    #[error("ApiError: {0} ({0:?})")]
    Api(#[source] Status),

    /// The API server answered with a non-2xx response that did not decode
    /// as a `Status` value.
    #[error("ServerResponseError: HTTP {code}")]
    ServerResponse {
        /// The observed HTTP status code
        code: u16,
        /// The raw response body, for diagnostics
        body: String,
    },

    /// A local check failed before any request was made
    #[error("ValidationError: {0}")]
    Validation(String),

    /// Service stack error
    #[error("ServiceError: {0}")]
    Service(#[source] tower::BoxError),

    /// Transport-layer watch stream interruption; always retryable
    #[error("StreamError: {0}")]
    Stream(#[source] std::io::Error),

    /// TLS setup failed
    #[error("TlsError: {0}")]
    Tls(#[source] std::io::Error),

    /// Failed to register metrics collectors
    #[error("MetricsError: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Http based error
    #[error("HttpError: {0}")]
    Http(#[from] http::Error),

    /// Common error case when parsing responses into own structs
    #[error("Error deserializing response: {0}")]
    Serde(#[from] serde_json::Error),

    /// Error bubbled up from request building or codec translation
    #[error(transparent)]
    Core(#[from] app_sdk_core::Error),
}

impl Error {
    /// Whether the error is the API server saying the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Api(status) => status.reason == "NotFound" || status.code == 404,
            Error::ServerResponse { code, .. } => *code == 404,
            _ => false,
        }
    }

    /// Whether the error is safe to retry without caller involvement.
    ///
    /// Only stream interruptions qualify; everything else is surfaced for
    /// the caller to decide.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Stream(_))
    }
}

/// Convenience alias over this crate's [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection() {
        let err = Error::Api(Status::failure("gone", "NotFound"));
        assert!(err.is_not_found());
        let err = Error::ServerResponse {
            code: 404,
            body: String::new(),
        };
        assert!(err.is_not_found());
        let err = Error::Validation("nope".into());
        assert!(!err.is_not_found());
    }

    #[test]
    fn only_stream_errors_retry() {
        let err = Error::Stream(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.is_retryable());
        let err = Error::Api(Status::failure("conflict", "Conflict").with_code(409));
        assert!(!err.is_retryable());
    }
}
