use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use petpal_social::notifications::unread_count;
use petpal_types::api::{Claims, MarkAllReadResponse, NotificationList};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let notifications = state.backend().notifications_of(&claims.sub).await?;
    Ok(Json(NotificationList {
        unread: unread_count(&notifications),
        notifications,
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state
        .coordinator
        .mark_notification_read(&claims.sub, &notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let updated = state
        .coordinator
        .mark_all_notifications_read(&claims.sub)
        .await?;
    Ok(Json(MarkAllReadResponse { updated }))
}
