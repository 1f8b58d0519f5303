use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use petpal_social::feed::{liked_view, profile_view};
use petpal_social::profiles::{Resolution, resolve_by_handle, resolve_by_uid, search_profiles};
use petpal_types::api::{Claims, ImageQuery, ProfilePostsResponse, SearchQuery, ToggleResponse, UpdateProfileRequest};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

pub async fn get_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let profiles = state.backend().profiles().await?;
    match resolve_by_uid(&profiles, &uid) {
        Resolution::Found(profile) => Ok(Json(profile)),
        Resolution::NotFound => Err(ApiError::not_found(format!("no user {}", uid))),
    }
}

pub async fn toggle_follow(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let active = state.coordinator.toggle_follow(&claims.sub, &target).await?;
    Ok(Json(ToggleResponse { active }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = state
        .coordinator
        .update_profile(&claims.sub, &req.name, &req.handle, req.bio.as_deref())
        .await?;
    Ok(Json(profile))
}

/// PUT /profile/avatar?filename= with the raw image bytes as the body.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ImageQuery>,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    let profile = state
        .coordinator
        .set_avatar(&state.blobs, &claims.sub, &query.filename, &bytes)
        .await?;
    Ok(Json(profile))
}

pub async fn get_by_handle(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let profiles = state.backend().profiles().await?;
    match resolve_by_handle(&profiles, &handle) {
        Resolution::Found(profile) => Ok(Json(profile)),
        Resolution::NotFound => Err(ApiError::not_found(format!("no user with handle {}", handle))),
    }
}

/// Everything a profile page shows: own posts, own replies, and liked posts.
pub async fn get_profile_posts(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let backend = state.backend();
    let (posts, profiles) = (backend.posts().await?, backend.profiles().await?);

    let Resolution::Found(profile) = resolve_by_handle(&profiles, &handle) else {
        return Err(ApiError::not_found(format!("no user with handle {}", handle)));
    };

    let view = profile_view(&posts, &profiles, &profile.uid);
    let liked = liked_view(&posts, &profiles, &profile.uid);
    Ok(Json(ProfilePostsResponse {
        profile,
        posts: view.posts,
        replies: view.replies,
        liked,
    }))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let profiles = state.backend().profiles().await?;
    Ok(Json(search_profiles(&profiles, &query.q)))
}
