use chrono::{DateTime, Utc};

use super::NotificationRecord;

/// Most recent post of a channel as reported by the fetcher. Never persisted
/// as-is; only its publish time and link end up in a `NotificationRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestItem {
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

impl LatestItem {
    /// An item is new when nothing was notified yet or it was published
    /// strictly after the last notified one.
    pub fn is_newer_than(&self, last: Option<&NotificationRecord>) -> bool {
        match last {
            Some(record) => self.published_at > record.published_at,
            None => true,
        }
    }
}

/// Result of a single check-and-notify run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Latest item was already notified.
    NoChange,
    /// New item, message sent and state recorded.
    Delivered,
    /// New item recorded without sending (baseline on subscribe).
    Recorded,
    /// New item, the send failed but the state was recorded anyway.
    DeliveryFailed,
    FetchError,
    NotSubscribed,
}

impl Outcome {
    pub fn describe(&self) -> &'static str {
        match self {
            Outcome::NoChange => "no new posts",
            Outcome::Delivered => "new post sent",
            Outcome::Recorded => "latest post remembered",
            Outcome::DeliveryFailed => "new post found but the message could not be sent",
            Outcome::FetchError => "channel could not be fetched",
            Outcome::NotSubscribed => "not subscribed",
        }
    }
}
