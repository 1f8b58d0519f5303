use anyhow::Result;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tokio::sync::watch;
use tracing::debug;

use petpal_types::api::Claims;

/// Tokens stay valid this long after issue.
const TOKEN_TTL_DAYS: i64 = 30;

/// The signed-in user as far as one client session is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub handle: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            uid: claims.sub,
            handle: claims.handle,
        }
    }
}

pub fn create_token(secret: &str, uid: &str, handle: &str) -> Result<String> {
    let claims = Claims {
        sub: uid.to_string(),
        handle: handle.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Per-client auth state. Watchers are told about every sign-in and sign-out.
pub struct AuthSession {
    state: watch::Sender<Option<Identity>>,
}

impl AuthSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn sign_in(&self, identity: Identity) {
        debug!("Session signed in as {} ({})", identity.handle, identity.uid);
        self.state.send_replace(Some(identity));
    }

    pub fn sign_in_with_token(&self, token: &str, secret: &str) -> Result<Identity> {
        let identity = Identity::from(verify_token(token, secret)?);
        self.sign_in(identity.clone());
        Ok(identity)
    }

    pub fn sign_out(&self) {
        if self.state.send_replace(None).is_some() {
            debug!("Session signed out");
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.state.borrow().as_ref().map(|i| i.uid.clone())
    }

    /// Receiver that observes the current identity and every later change.
    pub fn on_auth_state_change(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_and_wrong_secret() {
        let token = create_token("s3cret", "u1", "@ana").unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.handle, "@ana");
        assert!(verify_token(&token, "other").is_err());
    }

    #[tokio::test]
    async fn test_watchers_see_sign_in_and_out() {
        let session = AuthSession::new();
        let mut watcher = session.on_auth_state_change();
        assert_eq!(session.current_user_id(), None);

        let token = create_token("s3cret", "u1", "@ana").unwrap();
        session.sign_in_with_token(&token, "s3cret").unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow().as_ref().map(|i| i.uid.as_str()), Some("u1"));
        assert_eq!(session.current_user_id().as_deref(), Some("u1"));

        session.sign_out();
        watcher.changed().await.unwrap();
        assert!(watcher.borrow().is_none());
    }
}
