use thiserror::Error;

pub type SocialResult<T> = Result<T, SocialError>;

/// Failure of a social operation. Everything except `Backend` is decided
/// before anything is written.
#[derive(Debug, Error)]
pub enum SocialError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl SocialError {
    /// Only storage failures are worth retrying; the rest would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SocialError::Backend(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SocialError::Validation(_) => "validation",
            SocialError::Forbidden(_) => "forbidden",
            SocialError::NotFound(_) => "not_found",
            SocialError::Conflict(_) => "conflict",
            SocialError::Backend(_) => "backend",
        }
    }
}
