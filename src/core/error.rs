use std::io;
use thiserror::Error;

/// Error kinds surfaced by the network server core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing payload: {0}")]
    MissingPayload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Canceled: {0}")]
    Canceled(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new missing payload error
    pub fn missing_payload(msg: impl Into<String>) -> Self {
        Error::MissingPayload(msg.into())
    }

    /// Creates a new not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new permission denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Error::PermissionDenied(msg.into())
    }

    /// Creates a new failed precondition error
    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Error::FailedPrecondition(msg.into())
    }

    /// Creates a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Error::Unavailable(msg.into())
    }

    /// Creates a new canceled error
    pub fn canceled(msg: impl Into<String>) -> Self {
        Error::Canceled(msg.into())
    }

    /// Missing payloads are a kind of invalid argument.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::MissingPayload(_))
    }

    pub fn is_missing_payload(&self) -> bool {
        matches!(self, Error::MissingPayload(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }

    pub fn is_failed_precondition(&self) -> bool {
        matches!(self, Error::FailedPrecondition(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }
}
