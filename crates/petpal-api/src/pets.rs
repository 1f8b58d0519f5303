use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use petpal_social::pets::pets_of;
use petpal_types::api::{Claims, ImageQuery, NewPet};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn add_pet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewPet>,
) -> ApiResult<impl IntoResponse> {
    let pet = state.coordinator.add_pet(&claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(pet)))
}

pub async fn list_pets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let pets = state.backend().pets().await?;
    Ok(Json(pets_of(&pets, &claims.sub)))
}

/// PUT /pets/{id}/image?filename= with the raw image bytes as the body.
pub async fn upload_image(
    State(state): State<AppState>,
    Path(pet_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ImageQuery>,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    let pet = state
        .coordinator
        .attach_pet_image(&state.blobs, &claims.sub, &pet_id, &query.filename, &bytes)
        .await?;
    Ok(Json(pet))
}

pub async fn delete_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state
        .coordinator
        .delete_pet(&state.blobs, &claims.sub, &pet_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
