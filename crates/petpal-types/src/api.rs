use serde::{Deserialize, Serialize};

use crate::models::{Notification, Post, Species, UserProfile};

// -- JWT Claims --

/// JWT claims shared by petpal-api (REST middleware) and petpal-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub handle: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub handle: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub uid: String,
    pub handle: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub uid: String,
    pub handle: String,
    pub token: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostContentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub active: bool,
}

/// Display data for a post's author. `live` is false when the post's
/// denormalized snapshot was used because no current profile was available.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorView {
    pub uid: String,
    pub name: String,
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    #[serde(flatten)]
    pub post: Post,
    pub author: AuthorView,
}

#[derive(Debug, Serialize)]
pub struct ProfilePostsResponse {
    pub profile: UserProfile,
    pub posts: Vec<FeedEntry>,
    pub replies: Vec<FeedEntry>,
    pub liked: Vec<FeedEntry>,
}

// -- Profiles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: String,
    pub handle: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

// -- Notifications --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationList {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

// -- Pets --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewPet {
    pub name: String,
    pub species: Species,
    pub age: u32,
    pub last_fed: String,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub length: f64,
    pub description: String,
    pub health_status: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub filename: String,
}
