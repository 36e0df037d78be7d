/// Shared error type used across all consultd crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation ({field}): {message}")]
    Validation { field: String, message: String },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("store: {0}")]
    Store(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for validation failures.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The transport-independent error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::LimitExceeded(_) => "LIMIT_EXCEEDED",
            Self::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) | Self::Json(_) | Self::Store(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    /// The HTTP status code this error maps to at the REST boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::NotFound(_) => 404,
            Self::Validation { .. } => 400,
            Self::LimitExceeded(_) => 409,
            Self::ExternalUnavailable(_) => 503,
            Self::Timeout(_) => 504,
            Self::Io(_) | Self::Json(_) | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// The message exposed to clients. Internal failures are redacted to a
    /// short string; full detail goes to the log only.
    pub fn public_message(&self) -> String {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Store(_) | Self::Internal(_) => {
                "internal error".to_owned()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
