use thiserror::Error;

/// Errors produced by a backend adapter.
///
/// Everything here is recoverable from the client's point of view: a failed
/// call is reported and the previous consistent state stays intact.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transient transport / service failure. Re-attempt is a manual user
    /// action; no retry loop is implemented.
    #[error("Backend unavailable: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Registration with an identifier that already has an account.
    #[error("An account with this identifier already exists")]
    DuplicateIdentifier,

    #[error("No active session")]
    NoSession,

    #[error("Record not found")]
    NotFound,

    /// The service accepted the request but refused it (constraint, quota).
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackendError>;
