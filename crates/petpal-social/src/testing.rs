//! Fixtures shared by the unit tests.

use chrono::{DateTime, Utc};

use petpal_db::WriteBatch;
use petpal_types::models::{Notification, Post, UserProfile};

use crate::mutations::MutationCoordinator;
use crate::notifications::RetentionPolicy;
use crate::store::{Backend, POSTS, doc_path};

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn post(id: &str, author: &str, created_at: DateTime<Utc>) -> Post {
    Post {
        id: id.into(),
        author_id: author.into(),
        author_name: format!("Name of {}", author),
        author_handle: format!("@{}", author),
        content: format!("post {}", id),
        created_at,
        updated_at: None,
        likes: Default::default(),
        reposts: Default::default(),
        reply_count: 0,
        parent_id: None,
    }
}

pub fn profile(uid: &str, name: &str, handle: &str) -> UserProfile {
    UserProfile {
        uid: uid.into(),
        name: name.into(),
        handle: handle.into(),
        followers: Default::default(),
        following: Default::default(),
        avatar_url: None,
        bio: None,
        created_at: None,
    }
}

pub fn coordinator() -> MutationCoordinator {
    coordinator_with(RetentionPolicy::default())
}

pub fn coordinator_with(retention: RetentionPolicy) -> MutationCoordinator {
    MutationCoordinator::new(Backend::open_in_memory().unwrap(), retention)
}

pub async fn seed_profile(backend: &Backend, uid: &str, name: &str, handle: &str) -> UserProfile {
    let profile = profile(uid, name, handle);
    let mut batch = WriteBatch::new();
    batch
        .set_json(doc_path("users", uid).unwrap().to_string(), &profile)
        .unwrap();
    backend.write_atomic(batch).await.unwrap();
    profile
}

pub async fn seed_post(backend: &Backend, post: &Post) {
    let mut batch = WriteBatch::new();
    batch
        .set_json(doc_path(POSTS, &post.id).unwrap().to_string(), post)
        .unwrap();
    backend.write_atomic(batch).await.unwrap();
}

pub async fn stored_post(backend: &Backend, id: &str) -> Option<Post> {
    backend.posts().await.unwrap().remove(id)
}

pub async fn stored_profile(backend: &Backend, uid: &str) -> UserProfile {
    let mut profile: UserProfile = backend.load("users", uid).await.unwrap().unwrap();
    profile.uid = uid.into();
    profile
}

pub async fn inbox(backend: &Backend, uid: &str) -> Vec<Notification> {
    backend.notifications_of(uid).await.unwrap()
}
