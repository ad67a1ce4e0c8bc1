use thiserror::Error;

use atrium_backend::BackendError;

/// Errors surfaced by the client layer.
///
/// Nothing here is fatal to the session: the worst case is a failed action
/// with the previous consistent UI state intact.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transient backend failure; reported to the user, re-attempt is a
    /// manual action.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Blocked client-side before any call was made.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Caught before any network call, surfaced inline.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not signed in")]
    Unauthenticated,

    /// Acting on state the subscription model has already moved past
    /// (deselected target, deleted message). Treated as a silent no-op at
    /// the boundary since the live feed reconciles the view shortly.
    #[error("Stale state: {0}")]
    Stale(String),
}

impl ClientError {
    /// Whether the boundary layer should swallow this error instead of
    /// raising a notice.
    pub fn is_silent(&self) -> bool {
        matches!(self, ClientError::Stale(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
