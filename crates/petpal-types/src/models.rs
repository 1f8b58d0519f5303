use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handles always carry this marker as their first character.
pub const HANDLE_MARKER: char = '@';

/// One user-authored message. `author_name` and `author_handle` are a copy of
/// the author's profile taken at post time and are never re-synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_handle: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::sets", skip_serializing_if = "BTreeSet::is_empty")]
    pub likes: BTreeSet<String>,
    #[serde(default, with = "crate::sets", skip_serializing_if = "BTreeSet::is_empty")]
    pub reposts: BTreeSet<String>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_liked_by(&self, uid: &str) -> bool {
        self.likes.contains(uid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    pub name: String,
    pub handle: String,
    /// `followers` contains X iff X follows this profile.
    #[serde(default, with = "crate::sets", skip_serializing_if = "BTreeSet::is_empty")]
    pub followers: BTreeSet<String>,
    #[serde(default, with = "crate::sets", skip_serializing_if = "BTreeSet::is_empty")]
    pub following: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn is_following(&self, uid: &str) -> bool {
        self.following.contains(uid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Follow,
    Like,
    Reply,
}

/// One fan-out event in a recipient's list. Only `read` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_user_id: String,
    pub from_user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Species {
    Dog,
    Cat,
    Bird,
    Fish,
    Rabbit,
    Turtle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    #[serde(default)]
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub species: Species,
    pub age: u32,
    pub last_fed: String,
    pub height: f64,
    pub weight: f64,
    pub length: f64,
    pub description: String,
    pub health_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_decodes_store_shape() {
        let post: Post = serde_json::from_value(serde_json::json!({
            "authorId": "u1",
            "authorName": "Ana",
            "authorHandle": "@ana",
            "content": "hi",
            "createdAt": "2024-05-01T10:00:00Z",
            "likes": { "u2": true }
        }))
        .unwrap();

        assert_eq!(post.id, "");
        assert!(post.is_liked_by("u2"));
        assert_eq!(post.reply_count, 0);
        assert!(!post.is_reply());
    }

    #[test]
    fn test_notification_kind_uses_type_key() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "type": "follow",
            "fromUserId": "u1",
            "fromUserName": "Ana",
            "timestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(n.kind, NotificationKind::Follow);
        assert!(!n.read);

        let back = serde_json::to_value(&n).unwrap();
        assert_eq!(back["type"], "follow");
    }
}
