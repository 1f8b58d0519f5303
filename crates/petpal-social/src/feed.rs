//! View assembly over post and profile snapshots.
//!
//! Everything here is a pure function of its inputs: the same snapshots always
//! produce the same entries in the same order. Snapshots from different
//! subscriptions may be out of step with each other, so a post whose author
//! profile is missing still renders from the fields copied onto the post.

use std::collections::BTreeMap;

use serde_json::Value;

use petpal_types::api::{AuthorView, FeedEntry};
use petpal_types::models::{Post, UserProfile};

use crate::error::SocialResult;
use crate::store::{Backend, POSTS, USERS, collection_path, decode_entries};

pub type PostSnapshot = BTreeMap<String, Post>;
pub type ProfileSnapshot = BTreeMap<String, UserProfile>;

/// A user's own posts split into top-level posts and replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileView {
    pub posts: Vec<FeedEntry>,
    pub replies: Vec<FeedEntry>,
}

pub fn decode_posts(value: Option<Value>) -> PostSnapshot {
    decode_entries(value, "post", |post: &mut Post, id| post.id = id.to_string())
}

pub fn decode_profiles(value: Option<Value>) -> ProfileSnapshot {
    decode_entries(value, "profile", |profile: &mut UserProfile, uid| {
        profile.uid = uid.to_string()
    })
}

impl Backend {
    pub async fn posts(&self) -> SocialResult<PostSnapshot> {
        Ok(decode_posts(self.read_once(&collection_path(POSTS)?).await?))
    }

    pub async fn profiles(&self) -> SocialResult<ProfileSnapshot> {
        Ok(decode_profiles(self.read_once(&collection_path(USERS)?).await?))
    }
}

/// Every post, newest first.
pub fn community_feed(posts: &PostSnapshot, profiles: &ProfileSnapshot) -> Vec<FeedEntry> {
    assemble(posts.values(), profiles)
}

pub fn profile_view(posts: &PostSnapshot, profiles: &ProfileSnapshot, uid: &str) -> ProfileView {
    let (replies, top_level): (Vec<&Post>, Vec<&Post>) = posts
        .values()
        .filter(|p| p.author_id == uid)
        .partition(|p| p.is_reply());

    ProfileView {
        posts: assemble(top_level, profiles),
        replies: assemble(replies, profiles),
    }
}

pub fn liked_view(posts: &PostSnapshot, profiles: &ProfileSnapshot, uid: &str) -> Vec<FeedEntry> {
    assemble(posts.values().filter(|p| p.is_liked_by(uid)), profiles)
}

pub fn thread_view(posts: &PostSnapshot, profiles: &ProfileSnapshot, parent_id: &str) -> Vec<FeedEntry> {
    assemble(
        posts
            .values()
            .filter(|p| p.parent_id.as_deref() == Some(parent_id)),
        profiles,
    )
}

/// Home feed: posts by everyone `viewer` follows, plus the viewer's own.
pub fn following_feed(posts: &PostSnapshot, profiles: &ProfileSnapshot, viewer: &str) -> Vec<FeedEntry> {
    let following = profiles.get(viewer).map(|p| &p.following);
    assemble(
        posts.values().filter(|p| {
            p.author_id == viewer || following.is_some_and(|f| f.contains(&p.author_id))
        }),
        profiles,
    )
}

fn assemble<'a>(posts: impl IntoIterator<Item = &'a Post>, profiles: &ProfileSnapshot) -> Vec<FeedEntry> {
    let mut entries: Vec<FeedEntry> = posts
        .into_iter()
        .map(|post| FeedEntry {
            author: author_of(post, profiles),
            post: post.clone(),
        })
        .collect();

    entries.sort_by(|a, b| {
        b.post
            .created_at
            .cmp(&a.post.created_at)
            .then_with(|| b.post.id.cmp(&a.post.id))
    });
    entries
}

fn author_of(post: &Post, profiles: &ProfileSnapshot) -> AuthorView {
    match profiles.get(&post.author_id) {
        Some(profile) => AuthorView {
            uid: post.author_id.clone(),
            name: profile.name.clone(),
            handle: profile.handle.clone(),
            avatar_url: profile.avatar_url.clone(),
            live: true,
        },
        None => AuthorView {
            uid: post.author_id.clone(),
            name: post.author_name.clone(),
            handle: post.author_handle.clone(),
            avatar_url: None,
            live: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, post, profile};
    use serde_json::json;

    fn sample() -> (PostSnapshot, ProfileSnapshot) {
        let mut posts = PostSnapshot::new();
        for p in [
            post("p1", "u1", at(10)),
            post("p2", "u2", at(20)),
            post("p3", "u1", at(20)),
            Post {
                parent_id: Some("p2".into()),
                ..post("r1", "u1", at(30))
            },
        ] {
            posts.insert(p.id.clone(), p);
        }

        let mut profiles = ProfileSnapshot::new();
        let mut ana = profile("u1", "Ana Live", "@ana");
        ana.following.insert("u2".into());
        profiles.insert("u1".into(), ana);
        (posts, profiles)
    }

    fn ids(entries: &[FeedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.post.id.as_str()).collect()
    }

    #[test]
    fn test_community_feed_newest_first_ties_by_id() {
        let (posts, profiles) = sample();
        let feed = community_feed(&posts, &profiles);
        assert_eq!(ids(&feed), vec!["r1", "p3", "p2", "p1"]);
    }

    #[test]
    fn test_feed_is_deterministic() {
        let (posts, profiles) = sample();
        assert_eq!(community_feed(&posts, &profiles), community_feed(&posts, &profiles));
    }

    #[test]
    fn test_missing_author_falls_back_to_post_snapshot() {
        let (posts, profiles) = sample();
        let feed = community_feed(&posts, &profiles);

        let by_ana = feed.iter().find(|e| e.post.id == "p1").unwrap();
        assert!(by_ana.author.live);
        assert_eq!(by_ana.author.name, "Ana Live");

        // u2 has no profile in the snapshot
        let orphan = feed.iter().find(|e| e.post.id == "p2").unwrap();
        assert!(!orphan.author.live);
        assert_eq!(orphan.author.name, "Name of u2");
        assert_eq!(orphan.author.handle, "@u2");
    }

    #[test]
    fn test_profile_view_partitions_replies() {
        let (posts, profiles) = sample();
        let view = profile_view(&posts, &profiles, "u1");
        assert_eq!(ids(&view.posts), vec!["p3", "p1"]);
        assert_eq!(ids(&view.replies), vec!["r1"]);
    }

    #[test]
    fn test_liked_and_thread_views() {
        let (mut posts, profiles) = sample();
        posts.get_mut("p1").unwrap().likes.insert("u9".into());
        posts.get_mut("r1").unwrap().likes.insert("u9".into());

        assert_eq!(ids(&liked_view(&posts, &profiles, "u9")), vec!["r1", "p1"]);
        assert!(liked_view(&posts, &profiles, "u1").is_empty());
        assert_eq!(ids(&thread_view(&posts, &profiles, "p2")), vec!["r1"]);
        assert!(thread_view(&posts, &profiles, "p1").is_empty());
    }

    #[test]
    fn test_following_feed_includes_own_posts() {
        let (mut posts, profiles) = sample();
        let stranger = post("p9", "u9", at(40));
        posts.insert(stranger.id.clone(), stranger);

        assert_eq!(ids(&following_feed(&posts, &profiles, "u1")), vec!["r1", "p3", "p2", "p1"]);
        // No profile loaded yet: only the viewer's own posts
        assert_eq!(ids(&following_feed(&posts, &profiles, "u9")), vec!["p9"]);
    }

    #[test]
    fn test_decode_posts_takes_id_from_key() {
        let posts = decode_posts(Some(json!({
            "p1": {
                "authorId": "u1",
                "authorName": "Ana",
                "authorHandle": "@ana",
                "content": "hi",
                "createdAt": "2024-05-01T10:00:00Z",
                "likes": {"u2": true}
            },
            "broken": {"content": 5}
        })));

        assert_eq!(posts.len(), 1);
        assert_eq!(posts["p1"].id, "p1");
        assert!(posts["p1"].is_liked_by("u2"));
        assert!(decode_posts(None).is_empty());
    }
}
