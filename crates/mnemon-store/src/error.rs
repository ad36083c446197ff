use std::fmt;

/// Result type for mnemon-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every backend seam.
///
/// The variant decides the handling: transient errors go through the
/// retry combinator, validation and contract errors never do, and an
/// unavailable backend surfaces as backpressure.
#[derive(Debug)]
pub enum Error {
    /// Transient network-ish failure: connection refused, timeout,
    /// rate limit, 5xx. Retry with backoff.
    Transient(String),

    /// Caller input rejected at the API boundary; never retried.
    Validation(String),

    /// Upstream violated a contract (unknown call_id, malformed
    /// envelope). Log, drop, advance.
    Contract(String),

    /// Backend down; surface as 503 and pause consumption.
    Unavailable(String),

    /// A live row with the same content hash already exists.
    Conflict { existing_id: String },

    /// Operation not supported by this backend implementation.
    Unsupported(String),

    /// Embedded storage failure.
    Storage(String),

    /// IO operation failed.
    Io(std::io::Error),
}

impl Error {
    /// Centralized transience predicate consulted by `with_retry`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transient(msg) => write!(f, "Transient error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::Contract(msg) => write!(f, "Upstream contract error: {}", msg),
            Error::Unavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            Error::Conflict { existing_id } => {
                write!(f, "Duplicate content (existing id {})", existing_id)
            }
            Error::Unsupported(msg) => write!(f, "Unsupported operation: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(format!("serialization: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and connection failures are transient; the rest is
        // classified by status where one is present.
        if err.is_timeout() || err.is_connect() {
            return Error::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                Error::Transient(err.to_string())
            }
            _ => Error::Unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(Error::Transient("ECONNREFUSED".into()).is_transient());
        assert!(!Error::Validation("missing session id".into()).is_transient());
        assert!(!Error::Contract("unknown call_id".into()).is_transient());
        assert!(!Error::Unavailable("graph store down".into()).is_transient());
        assert!(!Error::Conflict { existing_id: "m-1".into() }.is_transient());
    }
}
