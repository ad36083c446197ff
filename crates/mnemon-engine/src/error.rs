use std::fmt;

/// Result type for mnemon-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the aggregation layer
#[derive(Debug)]
pub enum Error {
    /// Graph/bus backend error
    Store(mnemon_store::Error),

    /// Envelope rejected at the boundary (missing session id, ...)
    Validation(String),
}

impl Error {
    /// Does the pipeline pause and retry this event?
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(err) => err.is_transient(),
            Error::Validation(_) => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Validation(_) => None,
        }
    }
}

impl From<mnemon_store::Error> for Error {
    fn from(err: mnemon_store::Error) -> Self {
        Error::Store(err)
    }
}
