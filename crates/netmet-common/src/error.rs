//! The error taxonomy from spec §7, expressed as a `thiserror` enum rather
//! than the original's informal exception classes
//! (`GlobalLockException`, `DBNotInitialized`, `DBInitFailure`, ...).
//!
//! Library code returns this; HTTP handlers map it onto a status code with
//! [`Error::status_code`]. Background workers log and swallow it (spec §7's
//! "library-level errors are logged with context and swallowed").

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Rejected at an HTTP boundary: bad shape, failed semantic check
    /// (e.g. `timeout >= period`).
    #[error("validation: {0}")]
    Validation(String),

    /// HMAC or basic-auth check failed.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Store version conflict (optimistic-concurrency CAS failure), or
    /// (internally) global-lock contention.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Recoverable network/store hiccup; callers may retry a bounded number
    /// of times.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable: the role aborts (raw socket open failure, store
    /// schema-init failure after retry).
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status code a role's router should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::AuthFailure(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Transient(_) => 503,
            Error::Fatal(_) => 500,
            Error::Io(_) => 500,
            Error::Serde(_) => 400,
        }
    }
}
