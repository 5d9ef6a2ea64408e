use thiserror::Error;

/// Result type for inspection operations
pub type LensResult<T> = Result<T, LensError>;

/// Infrastructure errors for store inspection operations
///
/// Connection-level conditions always escalate and carry the server name and
/// the attempted action, so a caller can render an actionable message without
/// further lookup. Malformed stored records never surface here; they are
/// dropped and logged at the operation boundary.
#[derive(Error, Debug, Clone)]
pub enum LensError {
    /// Opening or probing a connection failed (unreachable, auth, timeout)
    #[error("connection to {server} failed during {action}: {reason}")]
    Connection {
        server: String,
        action: String,
        reason: String,
    },

    /// An operation was attempted against a server that is not Connected
    #[error("not connected to {server}")]
    NotConnected { server: String },

    /// A store command failed at runtime
    #[error("store error on {server} during {action}: {reason}")]
    Store {
        server: String,
        action: String,
        reason: String,
    },

    /// The caller named a job source this client does not recognize
    #[error("invalid job source: {0}")]
    InvalidSource(String),

    /// Configuration could not be loaded or is internally inconsistent
    #[error("configuration error: {0}")]
    Config(String),
}

/// A stored record could not be decoded into a domain entity
///
/// Recovered locally: listings drop the record and continue. Only exposed so
/// decode helpers can report what went wrong to the log line.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record has no usable jid field")]
    MissingJid,

    #[error("worker metadata has no info payload")]
    MissingWorkerInfo,
}

impl From<std::io::Error> for LensError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}
