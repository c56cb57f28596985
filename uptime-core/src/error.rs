use thiserror::Error;

/// Errors surfaced across the uptime core's component boundaries.
///
/// Every component operation returns `Result<T>`; variants here are the
/// tagged taxonomy callers at the HTTP boundary map to status codes. No
/// component below that boundary inspects a status code.
#[derive(Error, Debug)]
pub enum UptimeError {
    /// Named resource does not exist, or does not belong to the acting user.
    /// The two cases are indistinguishable by design, to avoid leaking
    /// existence of another user's node.
    #[error("not found: {0}")]
    NotFound(String),

    /// `PauseNode` called on a node already `paused`.
    #[error("already paused: {0}")]
    AlreadyPaused(String),

    /// `ResumeNode` called on a node already `active`.
    #[error("already active: {0}")]
    AlreadyActive(String),

    /// A field in a request violates the range/format rules of the data model.
    #[error("validation error: {0}")]
    Validation(String),

    /// Manual-trigger attempt on a node not owned by the acting user.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Storage or unexpected failure; logged with full detail, reported
    /// to callers as a generic error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout `uptime-core`.
pub type Result<T> = std::result::Result<T, UptimeError>;

impl From<serde_json::Error> for UptimeError {
    fn from(err: serde_json::Error) -> Self {
        UptimeError::Internal(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for UptimeError {
    fn from(err: std::io::Error) -> Self {
        UptimeError::Internal(format!("io error: {err}"))
    }
}

impl UptimeError {
    /// Coarse classification used by the HTTP layer to pick a status code.
    pub fn kind(&self) -> &'static str {
        match self {
            UptimeError::NotFound(_) => "not_found",
            UptimeError::AlreadyPaused(_) => "already_paused",
            UptimeError::AlreadyActive(_) => "already_active",
            UptimeError::Validation(_) => "validation_error",
            UptimeError::Unauthorized(_) => "unauthorized",
            UptimeError::Internal(_) => "internal",
        }
    }
}
