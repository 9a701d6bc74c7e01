use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::LatestItem;

/// Per-channel subscription settings, stored under the owning user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub interval_hours: u32,
    #[serde(default)]
    pub last_check_at: Option<DateTime<Utc>>,
    pub subscribed_at: DateTime<Utc>,
}

impl SubscriptionConfig {
    pub fn new(interval_hours: u32, now: DateTime<Utc>) -> Self {
        Self {
            interval_hours,
            last_check_at: None,
            subscribed_at: now,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::hours(i64::from(self.interval_hours))
    }

    /// Earliest moment the next check may run. A never-checked subscription
    /// is due immediately.
    pub fn due_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_check_at {
            Some(last) => last
                .checked_add_signed(self.interval())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at(now) <= now
    }
}

/// What was last delivered for a (user, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub published_at: DateTime<Utc>,
    pub link: String,
    pub notified_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn from_item(item: &LatestItem, now: DateTime<Utc>) -> Self {
        Self {
            published_at: item.published_at,
            link: item.link.clone(),
            notified_at: now,
        }
    }
}

/// Flattened view of one subscription, used when scanning every user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub user_id: String,
    pub channel_id: String,
    pub config: SubscriptionConfig,
}

impl Subscription {
    pub fn due_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.config.due_at(now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.config.is_due(now)
    }
}
