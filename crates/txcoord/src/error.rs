use thiserror::Error;

/// Discriminant of a `TxError`, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unknown,
    NoConnection,
    Invalid,
    Expired,
    DifferentRootKey,
    Concurrent,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown",
            ErrorKind::NoConnection => "no_connection",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Expired => "expired",
            ErrorKind::DifferentRootKey => "different_rootkey",
            ErrorKind::Concurrent => "concurrent",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("Coordination store error: {message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<coordstore::Error>,
    },

    #[error("No connection to coordination store: {0}")]
    NoConnection(String),

    #[error("Invalid transaction: {0}")]
    Invalid(String),

    #[error("Transaction expired: {0}")]
    Expired(String),

    #[error("Different root key: {0}")]
    DifferentRootKey(String),

    #[error("Concurrent transaction: {0}")]
    Concurrent(String),
}

impl TxError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxError::Unknown { .. } => ErrorKind::Unknown,
            TxError::NoConnection(_) => ErrorKind::NoConnection,
            TxError::Invalid(_) => ErrorKind::Invalid,
            TxError::Expired(_) => ErrorKind::Expired,
            TxError::DifferentRootKey(_) => ErrorKind::DifferentRootKey,
            TxError::Concurrent(_) => ErrorKind::Concurrent,
        }
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        TxError::Unknown {
            message: message.into(),
            source: None,
        }
    }

    /// True when the caller should retry with a fresh transaction id
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Concurrent | ErrorKind::NoConnection)
    }
}

impl From<coordstore::Error> for TxError {
    fn from(err: coordstore::Error) -> Self {
        if err.is_connection_error() {
            TxError::NoConnection(err.to_string())
        } else {
            TxError::Unknown {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TxError>;
