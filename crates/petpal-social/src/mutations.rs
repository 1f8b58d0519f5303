use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use petpal_db::{TxReader, WriteBatch};
use petpal_types::models::{Notification, NotificationKind, Post, UserProfile};

use crate::error::{SocialError, SocialResult};
use crate::feed::decode_posts;
use crate::notifications::{RetentionPolicy, compose, decode_notifications, fan_out};
use crate::store::{Backend, NOTIFICATIONS, POSTS, USERS, child_path, collection_path, doc_path, read_doc};

pub const MAX_POST_CHARS: usize = 500;

/// A per-user mark on a post, stored as a set under the post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Like,
    Repost,
}

impl Reaction {
    fn field(self) -> &'static str {
        match self {
            Reaction::Like => "likes",
            Reaction::Repost => "reposts",
        }
    }

    fn members(self, post: &Post) -> &BTreeSet<String> {
        match self {
            Reaction::Like => &post.likes,
            Reaction::Repost => &post.reposts,
        }
    }

    /// Notification sent to the post's author when someone adds this reaction.
    fn notification(self) -> Option<NotificationKind> {
        match self {
            Reaction::Like => Some(NotificationKind::Like),
            Reaction::Repost => None,
        }
    }
}

/// Applies user actions to the store. Each operation is one transaction, so
/// the decision and every path it writes (post, both follow sets, the
/// notification) land together or not at all.
#[derive(Clone)]
pub struct MutationCoordinator {
    backend: Backend,
    retention: RetentionPolicy,
}

impl MutationCoordinator {
    pub fn new(backend: Backend, retention: RetentionPolicy) -> Self {
        Self { backend, retention }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    // -- Reactions --

    /// Flip `uid`'s like on a post. Returns whether the post is now liked.
    pub async fn toggle_like(&self, post_id: &str, uid: &str) -> SocialResult<bool> {
        self.toggle_reaction(Reaction::Like, post_id, uid).await
    }

    pub async fn toggle_repost(&self, post_id: &str, uid: &str) -> SocialResult<bool> {
        self.toggle_reaction(Reaction::Repost, post_id, uid).await
    }

    pub async fn toggle_reaction(&self, reaction: Reaction, post_id: &str, uid: &str) -> SocialResult<bool> {
        let member = child_path(&doc_path(POSTS, post_id)?, &[reaction.field(), uid])?;
        let label = member.to_string();
        let notification_id = self.new_notification_id()?;
        let retention = self.retention;
        let post_id = post_id.to_string();
        let uid = uid.to_string();

        let active = self
            .backend
            .transact(move |tx| {
                let post = load_post(tx, &post_id)?;

                let mut batch = WriteBatch::new();
                if reaction.members(&post).contains(&uid) {
                    batch.delete(member.to_string());
                    return Ok((batch, false));
                }

                batch.set(member.to_string(), Value::Bool(true));
                if let Some(kind) = reaction.notification() {
                    if uid != post.author_id {
                        let notification = compose(tx, notification_id, kind, &uid, Some(post_id.clone()))?;
                        fan_out(tx, &mut batch, &post.author_id, &notification, &retention)?;
                    }
                }
                Ok((batch, true))
            })
            .await?;

        debug!("{} {}", if active { "Set" } else { "Cleared" }, label);
        Ok(active)
    }

    // -- Social graph --

    /// Flip whether `follower` follows `target`. Both sides change together.
    pub async fn toggle_follow(&self, follower: &str, target: &str) -> SocialResult<bool> {
        let follower_path = doc_path(USERS, follower)?;
        let target_path = doc_path(USERS, target)?;
        let following_entry = child_path(&follower_path, &["following", target])?;
        let follower_entry = child_path(&target_path, &["followers", follower])?;
        let notification_id = self.new_notification_id()?;
        let retention = self.retention;
        let follower = follower.to_string();
        let target = target.to_string();

        let following = self
            .backend
            .transact(move |tx| {
                let profile: UserProfile = read_doc(tx, &follower_path)?
                    .ok_or_else(|| SocialError::NotFound(format!("profile {}", follower)))?;
                if tx.read(&target_path)?.is_none() {
                    return Err(SocialError::NotFound(format!("profile {}", target)));
                }

                let mut batch = WriteBatch::new();
                if profile.is_following(&target) {
                    batch
                        .delete(following_entry.to_string())
                        .delete(follower_entry.to_string());
                    return Ok((batch, false));
                }

                batch
                    .set(following_entry.to_string(), Value::Bool(true))
                    .set(follower_entry.to_string(), Value::Bool(true));
                if follower != target {
                    let notification =
                        compose(tx, notification_id, NotificationKind::Follow, &follower, None)?;
                    fan_out(tx, &mut batch, &target, &notification, &retention)?;
                }
                Ok((batch, true))
            })
            .await?;

        Ok(following)
    }

    // -- Posts --

    pub async fn create_post(&self, author: &UserProfile, content: &str) -> SocialResult<Post> {
        let content = validate_content(content)?;
        let id = self.backend.generate_id(&collection_path(POSTS)?);
        let post = new_post(id, author, content, None)?;

        let mut batch = WriteBatch::new();
        batch.set_json(doc_path(POSTS, &post.id)?.to_string(), &post)?;
        self.backend.write_atomic(batch).await?;

        info!("{} created post {}", author.handle, post.id);
        Ok(post)
    }

    /// Post a reply under `parent_id`, bumping the parent's reply count and
    /// notifying its author in the same write.
    pub async fn create_reply(&self, author: &UserProfile, parent_id: &str, content: &str) -> SocialResult<Post> {
        let content = validate_content(content)?;
        let id = self.backend.generate_id(&collection_path(POSTS)?);
        let reply = new_post(id, author, content, Some(parent_id.to_string()))?;
        let reply_path = doc_path(POSTS, &reply.id)?;
        let notification_id = self.new_notification_id()?;
        let retention = self.retention;
        let parent_id = parent_id.to_string();

        let reply = self
            .backend
            .transact(move |tx| {
                let parent = load_post(tx, &parent_id)?;

                let mut batch = WriteBatch::new();
                batch.set_json(reply_path.to_string(), &reply)?;
                batch.set(
                    child_path(&doc_path(POSTS, &parent.id)?, &["replyCount"])?.to_string(),
                    json!(parent.reply_count + 1),
                );

                if parent.author_id != reply.author_id {
                    let notification = compose(
                        tx,
                        notification_id,
                        NotificationKind::Reply,
                        &reply.author_id,
                        Some(parent.id.clone()),
                    )?;
                    fan_out(tx, &mut batch, &parent.author_id, &notification, &retention)?;
                }
                Ok((batch, reply))
            })
            .await?;

        info!("{} replied to {} with {}", author.handle, reply.parent_id.as_deref().unwrap_or("?"), reply.id);
        Ok(reply)
    }

    /// Replace a post's content. Only its author may do this.
    pub async fn edit_post(&self, acting_uid: &str, post_id: &str, new_content: &str) -> SocialResult<Post> {
        let content = validate_content(new_content)?;
        let post_path = doc_path(POSTS, post_id)?;
        let content_path = child_path(&post_path, &["content"])?;
        let updated_path = child_path(&post_path, &["updatedAt"])?;
        let acting_uid = acting_uid.to_string();
        let post_id = post_id.to_string();

        self.backend
            .transact(move |tx| {
                let mut post = load_post(tx, &post_id)?;
                ensure_author(&post, &acting_uid)?;

                let mut batch = WriteBatch::new();
                if post.content == content {
                    return Ok((batch, post));
                }

                let now = Utc::now();
                batch
                    .set(content_path.to_string(), Value::String(content.clone()))
                    .set(updated_path.to_string(), json!(now));
                post.content = content;
                post.updated_at = Some(now);
                Ok((batch, post))
            })
            .await
    }

    /// Delete a post. Deleting a reply also decrements its parent's reply count.
    pub async fn delete_post(&self, acting_uid: &str, post_id: &str) -> SocialResult<()> {
        let post_path = doc_path(POSTS, post_id)?;
        let label = post_id.to_string();
        let acting_uid = acting_uid.to_string();
        let post_id = post_id.to_string();

        let parent = self
            .backend
            .transact(move |tx| {
                let post = load_post(tx, &post_id)?;
                ensure_author(&post, &acting_uid)?;

                let mut batch = WriteBatch::new();
                batch.delete(post_path.to_string());

                let parent = post.parent_id.filter(|p| *p != post.id);
                if let Some(parent_id) = &parent {
                    let parent_path = doc_path(POSTS, parent_id)?;
                    // The parent may already be gone
                    if let Some(body) = tx.read(&parent_path)? {
                        let count = body.get("replyCount").and_then(Value::as_u64).unwrap_or(0);
                        batch.set(
                            child_path(&parent_path, &["replyCount"])?.to_string(),
                            json!(count.saturating_sub(1)),
                        );
                    }
                }
                Ok((batch, parent))
            })
            .await?;

        match parent {
            Some(parent) => info!("Deleted reply {} of {}", label, parent),
            None => info!("Deleted post {}", label),
        }
        Ok(())
    }

    // -- Notifications --

    /// Mark one notification read. Marking an already-read one changes nothing.
    pub async fn mark_notification_read(&self, recipient: &str, notification_id: &str) -> SocialResult<()> {
        let path = child_path(&doc_path(NOTIFICATIONS, recipient)?, &[notification_id])?;
        let read_flag = child_path(&path, &["read"])?;
        let notification_id = notification_id.to_string();

        self.backend
            .transact(move |tx| {
                let notification: Notification = read_doc(tx, &path)?
                    .ok_or_else(|| SocialError::NotFound(format!("notification {}", notification_id)))?;

                let mut batch = WriteBatch::new();
                if !notification.read {
                    batch.set(read_flag.to_string(), Value::Bool(true));
                }
                Ok((batch, ()))
            })
            .await
    }

    /// Mark every notification of `recipient` read. Returns how many changed.
    pub async fn mark_all_notifications_read(&self, recipient: &str) -> SocialResult<usize> {
        let inbox = doc_path(NOTIFICATIONS, recipient)?;

        self.backend
            .transact(move |tx| {
                let mut batch = WriteBatch::new();
                for notification in decode_notifications(tx.read(&inbox)?) {
                    if !notification.read {
                        batch.set(
                            child_path(&inbox, &[notification.id.as_str(), "read"])?.to_string(),
                            Value::Bool(true),
                        );
                    }
                }
                let updated = batch.len();
                Ok((batch, updated))
            })
            .await
    }

    /// Delete every notification older than the retention window.
    pub async fn prune_expired_notifications(&self, now: DateTime<Utc>) -> SocialResult<usize> {
        let all = collection_path(NOTIFICATIONS)?;
        let Some(cutoff) = self.retention.cutoff(now) else {
            warn!(
                "Notification max age of {} days is out of range, skipping prune",
                self.retention.max_age_days
            );
            return Ok(0);
        };

        let removed = self
            .backend
            .transact(move |tx| {
                let mut batch = WriteBatch::new();
                let Some(Value::Object(inboxes)) = tx.read(&all)? else {
                    return Ok((batch, 0));
                };

                for (recipient, inbox) in inboxes {
                    let inbox_path = doc_path(NOTIFICATIONS, &recipient)?;
                    for notification in decode_notifications(Some(inbox)) {
                        if notification.timestamp < cutoff {
                            batch.delete(child_path(&inbox_path, &[notification.id.as_str()])?.to_string());
                        }
                    }
                }
                let removed = batch.len();
                Ok((batch, removed))
            })
            .await?;

        if removed > 0 {
            info!("Pruned {} notification(s) older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    // -- Maintenance --

    /// Recount replies for every post and repair any stored `replyCount` that
    /// disagrees. Returns the number of posts repaired.
    pub async fn reconcile_reply_counts(&self) -> SocialResult<usize> {
        let all = collection_path(POSTS)?;

        self.backend
            .transact(move |tx| {
                let posts = decode_posts(tx.read(&all)?);

                let mut actual: BTreeMap<&str, u32> = BTreeMap::new();
                for parent in posts.values().filter_map(|p| p.parent_id.as_deref()) {
                    *actual.entry(parent).or_default() += 1;
                }

                let mut batch = WriteBatch::new();
                for post in posts.values() {
                    let count = actual.get(post.id.as_str()).copied().unwrap_or(0);
                    if post.reply_count != count {
                        warn!(
                            "Post {} has replyCount {} but {} replies, repairing",
                            post.id, post.reply_count, count
                        );
                        batch.set(
                            child_path(&doc_path(POSTS, &post.id)?, &["replyCount"])?.to_string(),
                            json!(count),
                        );
                    }
                }
                let repaired = batch.len();
                Ok((batch, repaired))
            })
            .await
    }

    fn new_notification_id(&self) -> SocialResult<String> {
        Ok(self.backend.generate_id(&collection_path(NOTIFICATIONS)?))
    }
}

/// Trim `raw` and check it fits a post.
pub fn validate_content(raw: &str) -> SocialResult<String> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(SocialError::Validation("post content cannot be empty".into()));
    }

    let chars = content.chars().count();
    if chars > MAX_POST_CHARS {
        return Err(SocialError::Validation(format!(
            "post content is {} characters, the limit is {}",
            chars, MAX_POST_CHARS
        )));
    }
    Ok(content.to_string())
}

fn new_post(id: String, author: &UserProfile, content: String, parent_id: Option<String>) -> SocialResult<Post> {
    if author.uid.is_empty() {
        return Err(SocialError::Validation("author has no uid".into()));
    }

    Ok(Post {
        id,
        author_id: author.uid.clone(),
        author_name: author.name.clone(),
        author_handle: author.handle.clone(),
        content,
        created_at: Utc::now(),
        updated_at: None,
        likes: Default::default(),
        reposts: Default::default(),
        reply_count: 0,
        parent_id,
    })
}

fn load_post(tx: &TxReader<'_>, post_id: &str) -> SocialResult<Post> {
    let mut post: Post = read_doc(tx, &doc_path(POSTS, post_id)?)?
        .ok_or_else(|| SocialError::NotFound(format!("post {}", post_id)))?;
    post.id = post_id.to_string();
    Ok(post)
}

fn ensure_author(post: &Post, uid: &str) -> SocialResult<()> {
    if post.author_id != uid {
        return Err(SocialError::Forbidden(format!(
            "only the author can change post {}",
            post.id
        )));
    }
    Ok(())
}
