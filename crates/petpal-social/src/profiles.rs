use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use petpal_db::{BlobStore, TxReader, WriteBatch};
use petpal_types::models::{HANDLE_MARKER, UserProfile};

use crate::error::{SocialError, SocialResult};
use crate::feed::{ProfileSnapshot, decode_profiles};
use crate::mutations::MutationCoordinator;
use crate::store::{HANDLES, USERS, check_upload, child_path, collection_path, discard_upload_on_error, doc_path, read_doc};

pub const MIN_HANDLE_CHARS: usize = 3;
pub const MAX_HANDLE_CHARS: usize = 30;
pub const MIN_NAME_CHARS: usize = 2;
pub const MAX_NAME_CHARS: usize = 50;
pub const MAX_BIO_CHARS: usize = 160;

/// Outcome of looking a profile up. Missing is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(UserProfile),
    NotFound,
}

impl Resolution {
    pub fn into_option(self) -> Option<UserProfile> {
        match self {
            Resolution::Found(profile) => Some(profile),
            Resolution::NotFound => None,
        }
    }
}

/// Document stored at `handles/{key}`, reserving a handle for one uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleClaim {
    pub uid: String,
}

/// Canonical display form: surrounding whitespace and every marker removed,
/// then exactly one marker in front.
pub fn normalize_handle(raw: &str) -> String {
    let bare: String = raw.trim().chars().filter(|c| *c != HANDLE_MARKER).collect();
    format!("{}{}", HANDLE_MARKER, bare)
}

/// Case-insensitive key a handle is claimed and matched under. Dots are
/// stored as commas since they cannot appear in a store path.
pub fn handle_key(handle: &str) -> String {
    normalize_handle(handle)
        .trim_start_matches(HANDLE_MARKER)
        .to_lowercase()
        .replace('.', ",")
}

/// Normalize `raw` and check it is an acceptable handle.
pub fn validate_handle(raw: &str) -> SocialResult<String> {
    let handle = normalize_handle(raw);
    let bare = &handle[HANDLE_MARKER.len_utf8()..];
    let chars = bare.chars().count();

    if !(MIN_HANDLE_CHARS..=MAX_HANDLE_CHARS).contains(&chars) {
        return Err(SocialError::Validation(format!(
            "handle must be {} to {} characters",
            MIN_HANDLE_CHARS, MAX_HANDLE_CHARS
        )));
    }
    if !bare.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(SocialError::Validation(
            "handle may only contain letters, digits, '_' and '.'".into(),
        ));
    }
    Ok(handle)
}

pub fn validate_name(raw: &str) -> SocialResult<String> {
    let name = raw.trim();
    let chars = name.chars().count();
    if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&chars) {
        return Err(SocialError::Validation(format!(
            "name must be {} to {} characters",
            MIN_NAME_CHARS, MAX_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

fn validate_bio(raw: Option<&str>) -> SocialResult<Option<String>> {
    let Some(bio) = raw.map(str::trim).filter(|b| !b.is_empty()) else {
        return Ok(None);
    };
    if bio.chars().count() > MAX_BIO_CHARS {
        return Err(SocialError::Validation(format!(
            "bio is limited to {} characters",
            MAX_BIO_CHARS
        )));
    }
    Ok(Some(bio.to_string()))
}

pub fn resolve_by_uid(profiles: &ProfileSnapshot, uid: &str) -> Resolution {
    match profiles.get(uid) {
        Some(profile) => Resolution::Found(profile.clone()),
        None => Resolution::NotFound,
    }
}

/// Find the profile holding `raw` (with or without the marker, any case).
/// Duplicates left over from before handles were claimed resolve to the
/// lowest uid.
pub fn resolve_by_handle(profiles: &ProfileSnapshot, raw: &str) -> Resolution {
    let key = handle_key(raw);
    let mut matches = profiles.values().filter(|p| handle_key(&p.handle) == key);

    let Some(first) = matches.next() else {
        return Resolution::NotFound;
    };

    let others: Vec<&str> = matches.map(|p| p.uid.as_str()).collect();
    if !others.is_empty() {
        warn!(
            "Handle {} is held by several profiles ({} and {:?}), using {}",
            normalize_handle(raw),
            first.uid,
            others,
            first.uid
        );
    }
    Resolution::Found(first.clone())
}

/// Profiles whose name or handle contains `term`, ignoring case. An empty
/// term matches everyone.
pub fn search_profiles(profiles: &ProfileSnapshot, term: &str) -> Vec<UserProfile> {
    let needle = term.trim().to_lowercase();
    let mut found: Vec<UserProfile> = profiles
        .values()
        .filter(|p| {
            needle.is_empty()
                || p.name.to_lowercase().contains(&needle)
                || p.handle.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();

    found.sort_by(|a, b| a.handle.cmp(&b.handle).then_with(|| a.uid.cmp(&b.uid)));
    found
}

impl MutationCoordinator {
    /// Create the profile for a new account, claiming its handle.
    pub async fn register_profile(&self, uid: &str, name: &str, handle: &str) -> SocialResult<UserProfile> {
        let name = validate_name(name)?;
        let handle = validate_handle(handle)?;
        let key = handle_key(&handle);
        let uid = uid.to_string();

        let profile = self
            .backend()
            .transact(move |tx| {
                let profile_path = doc_path(USERS, &uid)?;
                if tx.read(&profile_path)?.is_some() {
                    return Err(SocialError::Conflict(format!("profile {} already exists", uid)));
                }
                ensure_handle_free(tx, &key, &uid, &handle)?;

                let profile = UserProfile {
                    uid: uid.clone(),
                    name,
                    handle,
                    followers: Default::default(),
                    following: Default::default(),
                    avatar_url: None,
                    bio: None,
                    created_at: Some(Utc::now()),
                };

                let mut batch = WriteBatch::new();
                batch.set_json(doc_path(HANDLES, &key)?.to_string(), &HandleClaim { uid })?;
                batch.set_json(profile_path.to_string(), &profile)?;
                Ok((batch, profile))
            })
            .await?;

        info!("Registered profile {} ({})", profile.handle, profile.uid);
        Ok(profile)
    }

    /// Change display name, handle and bio. A new handle is claimed and the
    /// old claim released in the same write.
    pub async fn update_profile(
        &self,
        uid: &str,
        name: &str,
        handle: &str,
        bio: Option<&str>,
    ) -> SocialResult<UserProfile> {
        let name = validate_name(name)?;
        let handle = validate_handle(handle)?;
        let bio = validate_bio(bio)?;
        let key = handle_key(&handle);
        let uid = uid.to_string();

        self.backend()
            .transact(move |tx| {
                let profile_path = doc_path(USERS, &uid)?;
                let mut profile: UserProfile = read_doc(tx, &profile_path)?
                    .ok_or_else(|| SocialError::NotFound(format!("profile {}", uid)))?;
                profile.uid = uid.clone();

                let mut batch = WriteBatch::new();
                let old_key = handle_key(&profile.handle);
                if old_key != key {
                    ensure_handle_free(tx, &key, &uid, &handle)?;
                    batch.set_json(doc_path(HANDLES, &key)?.to_string(), &HandleClaim { uid: uid.clone() })?;

                    // Legacy handles may not map to a valid key, and may never have been claimed
                    if let Ok(old_path) = doc_path(HANDLES, &old_key) {
                        let old_claim: Option<HandleClaim> = read_doc(tx, &old_path)?;
                        if old_claim.is_some_and(|c| c.uid == uid) {
                            batch.delete(old_path.to_string());
                        }
                    }
                    info!("{} is now {}", profile.handle, handle);
                }

                batch
                    .set(child_path(&profile_path, &["name"])?.to_string(), Value::String(name.clone()))
                    .set(child_path(&profile_path, &["handle"])?.to_string(), Value::String(handle.clone()));
                let bio_path = child_path(&profile_path, &["bio"])?.to_string();
                match &bio {
                    Some(text) => batch.set(bio_path, json!(text)),
                    None => batch.delete(bio_path),
                };

                profile.name = name;
                profile.handle = handle;
                profile.bio = bio;
                Ok((batch, profile))
            })
            .await
    }

    /// Delete a profile and release its handle claim.
    pub async fn remove_profile(&self, uid: &str) -> SocialResult<()> {
        let profile_path = doc_path(USERS, uid)?;
        let uid = uid.to_string();

        self.backend()
            .transact(move |tx| {
                let mut batch = WriteBatch::new();
                let Some(profile) = read_doc::<UserProfile>(tx, &profile_path)? else {
                    return Ok((batch, ()));
                };

                if let Ok(claim_path) = doc_path(HANDLES, &handle_key(&profile.handle)) {
                    let claim: Option<HandleClaim> = read_doc(tx, &claim_path)?;
                    if claim.is_some_and(|c| c.uid == uid) {
                        batch.delete(claim_path.to_string());
                    }
                }
                batch.delete(profile_path.to_string());
                warn!("Removed profile {} ({})", profile.handle, uid);
                Ok((batch, ()))
            })
            .await
    }

    /// Store a new avatar image and point the profile at it.
    pub async fn set_avatar(
        &self,
        blobs: &BlobStore,
        uid: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> SocialResult<UserProfile> {
        let file_name = check_upload(file_name, bytes)?;
        let profile_path = doc_path(USERS, uid)?;
        let current: UserProfile = self
            .backend()
            .load(USERS, uid)
            .await?
            .ok_or_else(|| SocialError::NotFound(format!("profile {}", uid)))?;

        let blob = blobs.upload(&format!("avatars/{}/{}", uid, file_name), bytes).await?;
        let url_path = child_path(&profile_path, &["avatarUrl"])?;
        let url = blob.url.clone();
        let uid = uid.to_string();

        let linked = self
            .backend()
            .transact(move |tx| {
                let mut profile: UserProfile = read_doc(tx, &profile_path)?
                    .ok_or_else(|| SocialError::NotFound(format!("profile {}", uid)))?;
                profile.uid = uid;

                let mut batch = WriteBatch::new();
                batch.set(url_path.to_string(), Value::String(url.clone()));
                let previous = profile.avatar_url.replace(url);
                Ok((batch, (profile, previous)))
            })
            .await;
        let (profile, previous) =
            discard_upload_on_error(blobs, &blob.path, current.avatar_url.as_deref(), linked).await?;

        if let Some(old) = previous.as_deref().and_then(|u| blobs.path_of(u)) {
            if old != blob.path {
                if let Err(e) = blobs.delete(old).await {
                    warn!("Failed to remove old avatar {}: {}", old, e);
                }
            }
        }
        Ok(profile)
    }
}

/// Fail with `Conflict` if another uid holds `key`, either through a claim or
/// through a profile written before claims existed.
fn ensure_handle_free(tx: &TxReader<'_>, key: &str, uid: &str, handle: &str) -> SocialResult<()> {
    let taken = || SocialError::Conflict(format!("handle {} is already taken", handle));

    let claim: Option<HandleClaim> = read_doc(tx, &doc_path(HANDLES, key)?)?;
    if claim.is_some_and(|c| c.uid != uid) {
        return Err(taken());
    }

    let profiles = decode_profiles(tx.read(&collection_path(USERS)?)?);
    if profiles
        .values()
        .any(|p| p.uid != uid && handle_key(&p.handle) == key)
    {
        return Err(taken());
    }
    Ok(())
}
