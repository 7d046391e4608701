pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors returned by coordination store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NoNode(String),
    NodeExists(String),
    NotEmpty(String),

    /// A conditional write or delete found the node changed
    BadVersion(String),

    ConnectionLoss,
    SessionExpired,

    /// Malformed path, or a child requested under an ephemeral node
    BadArguments(String),

    Other(String),
}

impl Error {
    pub fn no_node<S: AsRef<str>>(path: S) -> Self {
        Error::NoNode(path.as_ref().to_string())
    }

    pub fn node_exists<S: AsRef<str>>(path: S) -> Self {
        Error::NodeExists(path.as_ref().to_string())
    }

    pub fn not_empty<S: AsRef<str>>(path: S) -> Self {
        Error::NotEmpty(path.as_ref().to_string())
    }

    pub fn bad_version<S: AsRef<str>>(path: S) -> Self {
        Error::BadVersion(path.as_ref().to_string())
    }

    pub fn bad_arguments<S: AsRef<str>>(msg: S) -> Self {
        Error::BadArguments(msg.as_ref().to_string())
    }

    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }

    /// True for the errors that mean the session cannot currently reach the store
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectionLoss | Error::SessionExpired)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NoNode(path) => write!(f, "No node: {}", path),
            Error::NodeExists(path) => write!(f, "Node exists: {}", path),
            Error::NotEmpty(path) => write!(f, "Node has children: {}", path),
            Error::BadVersion(path) => write!(f, "Node changed: {}", path),
            Error::ConnectionLoss => write!(f, "Connection to coordination store lost"),
            Error::SessionExpired => write!(f, "Coordination store session expired"),
            Error::BadArguments(msg) => write!(f, "Bad arguments: {}", msg),
            Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}
