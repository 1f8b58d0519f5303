use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use petpal_social::feed::{community_feed, following_feed, thread_view};
use petpal_types::api::{Claims, PostContentRequest, ToggleResponse};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn get_feed(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let backend = state.backend();
    let (posts, profiles) = (backend.posts().await?, backend.profiles().await?);
    Ok(Json(community_feed(&posts, &profiles)))
}

pub async fn get_following_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let backend = state.backend();
    let (posts, profiles) = (backend.posts().await?, backend.profiles().await?);
    Ok(Json(following_feed(&posts, &profiles, &claims.sub)))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let author = state.profile_of(&claims.sub).await?;
    let post = state.coordinator.create_post(&author, &req.content).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn edit_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let post = state
        .coordinator
        .edit_post(&claims.sub, &post_id, &req.content)
        .await?;
    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state.coordinator.delete_post(&claims.sub, &post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let active = state.coordinator.toggle_like(&post_id, &claims.sub).await?;
    Ok(Json(ToggleResponse { active }))
}

pub async fn toggle_repost(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let active = state.coordinator.toggle_repost(&post_id, &claims.sub).await?;
    Ok(Json(ToggleResponse { active }))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let author = state.profile_of(&claims.sub).await?;
    let reply = state
        .coordinator
        .create_reply(&author, &post_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn get_replies(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let backend = state.backend();
    let (posts, profiles) = (backend.posts().await?, backend.profiles().await?);
    Ok(Json(thread_view(&posts, &profiles, &post_id)))
}
