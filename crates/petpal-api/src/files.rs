use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tracing::debug;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// GET /files/{*path}: serve an uploaded image.
pub async fn get_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.blobs.read(&path).await.map_err(|e| {
        debug!("Refused blob path {}: {}", path, e);
        ApiError::bad_request("invalid file path")
    })?;

    let Some(bytes) = bytes else {
        return Err(ApiError::not_found(format!("no file at {}", path)));
    };

    Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes))
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type("pets/p1/rex.PNG"), "image/png");
        assert_eq!(content_type("avatars/u1/me.jpeg"), "image/jpeg");
        assert_eq!(content_type("avatars/u1/blob"), "application/octet-stream");
    }
}
