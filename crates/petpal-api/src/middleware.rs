use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use petpal_gateway::session::verify_token;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let claims = verify_token(token, &state.jwt_secret).map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::unauthorized("invalid or expired token")
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
