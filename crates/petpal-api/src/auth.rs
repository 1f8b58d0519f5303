use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use petpal_db::{BlobStore, Database};
use petpal_gateway::session::create_token;
use petpal_social::store::USERS;
use petpal_social::{Backend, MutationCoordinator};
use petpal_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use petpal_types::models::UserProfile;

use crate::error::{ApiError, ApiResult};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_EMAIL_LEN: usize = 254;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub coordinator: MutationCoordinator,
    pub blobs: BlobStore,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn backend(&self) -> &Backend {
        self.coordinator.backend()
    }

    pub fn db(&self) -> Arc<Database> {
        self.backend().dispatcher().db().clone()
    }

    /// Stored profile of `uid`. Accounts without one cannot post or log in.
    pub async fn profile_of(&self, uid: &str) -> ApiResult<UserProfile> {
        let mut profile: UserProfile = self
            .backend()
            .load(USERS, uid)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("profile {} not found", uid)))?;
        profile.uid = uid.to_string();
        Ok(profile)
    }
}

/// Run a synchronous database call off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') || email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::bad_request("a valid email address is required"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    // Check if email is taken
    let db = state.db();
    let lookup = email.clone();
    if run_blocking(move || db.get_credentials_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::conflict("email is already registered"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(ApiError::internal)?
        .to_string();

    let uid = Uuid::new_v4().to_string();
    let profile = state
        .coordinator
        .register_profile(&uid, &req.name, &req.handle)
        .await?;

    store_credentials(&state, &uid, email, password_hash).await?;

    let token = create_token(&state.jwt_secret, &uid, &profile.handle).map_err(ApiError::internal)?;

    info!("Registered {} ({})", profile.handle, uid);
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            uid,
            handle: profile.handle,
            token,
        }),
    ))
}

/// Insert the credentials row for a freshly registered profile. On failure the
/// profile is removed again so its handle is released.
async fn store_credentials(state: &AppStateInner, uid: &str, email: String, password_hash: String) -> ApiResult<()> {
    let db = state.db();
    let (cred_uid, cred_email) = (uid.to_string(), email.clone());
    let stored = run_blocking(move || db.create_credentials(&cred_uid, &cred_email, &password_hash)).await;
    let Err(e) = stored else {
        return Ok(());
    };

    warn!("Storing credentials for {} failed, removing its profile", uid);
    state.coordinator.remove_profile(uid).await?;

    // A concurrent signup with the same email won the insert
    let db = state.db();
    if run_blocking(move || db.get_credentials_by_email(&email)).await?.is_some() {
        return Err(ApiError::conflict("email is already registered"));
    }
    Err(e)
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db();
    let email = req.email.trim().to_lowercase();
    let credentials = run_blocking(move || db.get_credentials_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::unauthorized("wrong email or password"))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&credentials.password).map_err(ApiError::internal)?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("wrong email or password"))?;

    let profile = state.profile_of(&credentials.uid).await?;
    let token = create_token(&state.jwt_secret, &credentials.uid, &profile.handle)
        .map_err(ApiError::internal)?;

    Ok(Json(LoginResponse {
        uid: credentials.uid,
        handle: profile.handle,
        token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use petpal_social::RetentionPolicy;

    async fn state(dir: &tempfile::TempDir) -> AppStateInner {
        AppStateInner {
            coordinator: MutationCoordinator::new(Backend::open_in_memory().unwrap(), RetentionPolicy::default()),
            blobs: BlobStore::new(dir.path().to_path_buf(), "http://localhost:3000").await.unwrap(),
            jwt_secret: "test-secret".into(),
        }
    }

    #[tokio::test]
    async fn test_lost_email_race_is_conflict_and_frees_handle() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        state.db().create_credentials("winner", "ana@example.com", "hash").unwrap();
        state.coordinator.register_profile("loser", "Ana Two", "ana2").await.unwrap();

        let err = store_credentials(&state, "loser", "ana@example.com".into(), "hash".into())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        assert!(state.backend().load::<UserProfile>(USERS, "loser").await.unwrap().is_none());
        state.coordinator.register_profile("u3", "Someone", "ana2").await.unwrap();
    }

    #[tokio::test]
    async fn test_store_credentials_keeps_profile_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        state.coordinator.register_profile("u1", "Ana", "ana").await.unwrap();

        store_credentials(&state, "u1", "ana@example.com".into(), "hash".into()).await.unwrap();
        assert!(state.profile_of("u1").await.is_ok());
        let row = state.db().get_credentials_by_email("ana@example.com").unwrap().unwrap();
        assert_eq!(row.uid, "u1");
    }
}
