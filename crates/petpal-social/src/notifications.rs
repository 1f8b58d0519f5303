use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use petpal_db::{TxReader, WriteBatch};
use petpal_types::models::{Notification, NotificationKind, UserProfile};

use crate::error::SocialResult;
use crate::store::{Backend, NOTIFICATIONS, USERS, child_path, decode_entries, doc_path, read_doc};

/// How many notifications a recipient keeps, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_per_recipient: usize,
    pub max_age_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_per_recipient: 200,
            max_age_days: 90,
        }
    }
}

/// Longest retention window accepted, in days.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

impl RetentionPolicy {
    /// Notifications stamped before this instant are expired. `None` when the
    /// window is outside `1..=MAX_RETENTION_DAYS`, in which case nothing expires.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.max_age_days) {
            return None;
        }
        Duration::try_days(self.max_age_days).and_then(|window| now.checked_sub_signed(window))
    }
}

impl Backend {
    /// `uid`'s notifications, newest first.
    pub async fn notifications_of(&self, uid: &str) -> SocialResult<Vec<Notification>> {
        Ok(decode_notifications(self.read_once(&doc_path(NOTIFICATIONS, uid)?).await?))
    }
}

/// One recipient's notifications, newest first.
pub fn decode_notifications(value: Option<Value>) -> Vec<Notification> {
    let mut list: Vec<Notification> =
        decode_entries(value, "notification", |n: &mut Notification, id| n.id = id.to_string())
            .into_values()
            .collect();
    list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    list
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}

/// A notification from `from_uid`, signed with their current profile when it exists.
pub(crate) fn compose(
    tx: &TxReader<'_>,
    id: String,
    kind: NotificationKind,
    from_uid: &str,
    post_id: Option<String>,
) -> SocialResult<Notification> {
    let sender: Option<UserProfile> = read_doc(tx, &doc_path(USERS, from_uid)?)?;
    let (from_user_name, from_user_handle) = match sender {
        Some(profile) => (profile.name, Some(profile.handle)),
        None => (from_uid.to_string(), None),
    };

    Ok(Notification {
        id,
        kind,
        from_user_id: from_uid.to_string(),
        from_user_name,
        from_user_handle,
        post_id,
        timestamp: Utc::now(),
        read: false,
    })
}

/// Add `notification` to `recipient`'s list in `batch`, evicting the oldest
/// entries so the list stays within `policy.max_per_recipient`.
pub(crate) fn fan_out(
    tx: &TxReader<'_>,
    batch: &mut WriteBatch,
    recipient: &str,
    notification: &Notification,
    policy: &RetentionPolicy,
) -> SocialResult<()> {
    let inbox = doc_path(NOTIFICATIONS, recipient)?;
    let existing = decode_notifications(tx.read(&inbox)?);

    let keep = policy.max_per_recipient.saturating_sub(1);
    for old in existing.iter().skip(keep) {
        batch.delete(child_path(&inbox, &[old.id.as_str()])?.to_string());
    }
    if existing.len() > keep {
        debug!("Evicting {} notification(s) of {}", existing.len() - keep, recipient);
    }

    batch.set_json(child_path(&inbox, &[notification.id.as_str()])?.to_string(), notification)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_sorts_newest_first() {
        let list = decode_notifications(Some(json!({
            "a": {"type": "like", "fromUserId": "u1", "fromUserName": "Ana", "timestamp": "2024-05-01T10:00:00Z"},
            "b": {"type": "follow", "fromUserId": "u2", "fromUserName": "Bo", "timestamp": "2024-05-02T10:00:00Z", "read": true},
            "c": {"type": "reply", "fromUserId": "u3", "fromUserName": "Cy", "timestamp": "2024-05-01T10:00:00Z"},
        })));

        let ids: Vec<&str> = list.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(unread_count(&list), 2);
    }

    #[test]
    fn test_cutoff() {
        let policy = RetentionPolicy::default();
        let now = Utc::now();
        assert_eq!(now - policy.cutoff(now).unwrap(), Duration::days(90));
    }

    #[test]
    fn test_cutoff_out_of_range_never_expires() {
        let now = Utc::now();
        for days in [0, -1, MAX_RETENTION_DAYS + 1, 9_999_999_999_999, i64::MAX] {
            let policy = RetentionPolicy { max_age_days: days, ..RetentionPolicy::default() };
            assert_eq!(policy.cutoff(now), None, "{} days", days);
        }
        let longest = RetentionPolicy { max_age_days: MAX_RETENTION_DAYS, ..RetentionPolicy::default() };
        assert!(longest.cutoff(now).is_some());
    }
}
