use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use petpal_social::SocialError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error response: a status code plus `{ error, kind, retryable }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    /// Storage or runtime failure. The details go to the log, not the client.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!("Request failed: {}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "backend",
            message: "the server could not complete the request, try again".into(),
            retryable: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SocialError> for ApiError {
    fn from(err: SocialError) -> Self {
        let kind = err.kind();
        match err {
            SocialError::Validation(msg) => Self::new(StatusCode::BAD_REQUEST, kind, msg),
            SocialError::Forbidden(msg) => Self::new(StatusCode::FORBIDDEN, kind, msg),
            SocialError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, kind, format!("{} not found", what)),
            SocialError::Conflict(msg) => Self::new(StatusCode::CONFLICT, kind, msg),
            SocialError::Backend(e) => Self::internal(format!("{:#}", e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
            "retryable": self.retryable,
        }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_social_errors_map_to_statuses() {
        let cases = [
            (SocialError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (SocialError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (SocialError::NotFound("post p1".into()), StatusCode::NOT_FOUND),
            (SocialError::Conflict("taken".into()), StatusCode::CONFLICT),
            (SocialError::Backend(anyhow::anyhow!("disk")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let retryable = err.is_retryable();
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.retryable, retryable);
        }
    }
}
