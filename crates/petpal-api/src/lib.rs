pub mod auth;
pub mod error;
pub mod files;
pub mod middleware;
pub mod notifications;
pub mod pets;
pub mod posts;
pub mod profiles;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

use petpal_db::blobs::MAX_BLOB_SIZE;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Every HTTP route except the gateway upgrade.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/files/{*path}", get(files::get_file))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/feed", get(posts::get_feed))
        .route("/feed/following", get(posts::get_following_feed))
        .route("/posts", post(posts::create_post))
        .route("/posts/{id}", put(posts::edit_post).delete(posts::delete_post))
        .route("/posts/{id}/like", post(posts::toggle_like))
        .route("/posts/{id}/repost", post(posts::toggle_repost))
        .route("/posts/{id}/replies", get(posts::get_replies).post(posts::create_reply))
        .route("/users/{uid}", get(profiles::get_user))
        .route("/users/{uid}/follow", post(profiles::toggle_follow))
        .route("/profile", put(profiles::update_profile))
        .route("/profile/avatar", put(profiles::upload_avatar))
        .route("/profiles/{handle}", get(profiles::get_by_handle))
        .route("/profiles/{handle}/posts", get(profiles::get_profile_posts))
        .route("/search", get(profiles::search))
        .route("/notifications", get(notifications::list))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/pets", get(pets::list_pets).post(pets::add_pet))
        .route("/pets/{id}", axum::routing::delete(pets::delete_pet))
        .route("/pets/{id}/image", put(pets::upload_image))
        .layer(DefaultBodyLimit::max(MAX_BLOB_SIZE))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use petpal_db::BlobStore;
    use petpal_social::{Backend, MutationCoordinator, RetentionPolicy};

    use super::*;
    use crate::auth::AppStateInner;

    async fn app(dir: &tempfile::TempDir) -> Router {
        let blobs = BlobStore::new(dir.path().to_path_buf(), "http://localhost:3000")
            .await
            .unwrap();
        let coordinator = MutationCoordinator::new(Backend::open_in_memory().unwrap(), RetentionPolicy::default());
        router(Arc::new(AppStateInner {
            coordinator,
            blobs,
            jwt_secret: "test-secret".into(),
        }))
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, email: &str, handle: &str) -> (String, String) {
        let (status, body) = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({"email": email, "password": "hunter2hunter2", "name": "Test User", "handle": handle})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (body["uid"].as_str().unwrap().to_string(), body["token"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let (status, body) = call(&app, "GET", "/feed", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");

        let (status, _) = call(&app, "GET", "/feed", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_login_and_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (uid, _) = register(&app, "ana@example.com", "ana").await;

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "ANA@example.com", "password": "hunter2hunter2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uid"], uid.as_str());
        assert_eq!(body["handle"], "@ana");

        let (status, _) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "ana@example.com", "password": "wrong-password"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({"email": "other@example.com", "password": "hunter2hunter2", "name": "Other", "handle": "@ANA"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn test_post_like_and_notify_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (ana, ana_token) = register(&app, "ana@example.com", "ana").await;
        let (_, bo_token) = register(&app, "bo@example.com", "bobo").await;

        let (status, post) = call(&app, "POST", "/posts", Some(&ana_token), Some(json!({"content": "hello"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let post_id = post["id"].as_str().unwrap().to_string();

        let (status, toggled) = call(&app, "POST", &format!("/posts/{}/like", post_id), Some(&bo_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(toggled["active"], true);

        let (_, feed) = call(&app, "GET", "/feed", Some(&bo_token), None).await;
        assert_eq!(feed[0]["id"], post_id.as_str());
        assert_eq!(feed[0]["author"]["uid"], ana.as_str());
        assert_eq!(feed[0]["author"]["live"], true);

        let (_, list) = call(&app, "GET", "/notifications", Some(&ana_token), None).await;
        assert_eq!(list["unread"], 1);
        assert_eq!(list["notifications"][0]["type"], "like");

        let (status, body) = call(&app, "PUT", &format!("/posts/{}", post_id), Some(&bo_token), Some(json!({"content": "mine now"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "forbidden");

        let (status, updated) = call(&app, "POST", "/notifications/read-all", Some(&ana_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["updated"], 1);
    }

    #[tokio::test]
    async fn test_profile_posts_by_handle() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (_, token) = register(&app, "ana@example.com", "ana").await;

        let (_, post) = call(&app, "POST", "/posts", Some(&token), Some(json!({"content": "top"}))).await;
        let reply_uri = format!("/posts/{}/replies", post["id"].as_str().unwrap());
        let (status, _) = call(&app, "POST", &reply_uri, Some(&token), Some(json!({"content": "self reply"}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, page) = call(&app, "GET", "/profiles/ANA/posts", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["posts"].as_array().unwrap().len(), 1);
        assert_eq!(page["replies"].as_array().unwrap().len(), 1);
        assert_eq!(page["posts"][0]["replyCount"], 1);

        let (status, _) = call(&app, "GET", "/profiles/nobody", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
