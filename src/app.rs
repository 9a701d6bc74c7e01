use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, OwnedMutexGuard};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::db::{KvStore, NotificationStateStore, SubscriptionStore};
use crate::error::{AppError, Result};
use crate::feed::ItemFetcher;
use crate::locks::LockTable;
use crate::models::{
    LatestItem, NotificationRecord, Outcome, Subscription, SubscriptionConfig,
};
use crate::notify::{format_new_post, Notifier};

/// Longest accepted poll interval (one year).
pub const MAX_INTERVAL_HOURS: u32 = 24 * 365;

/// Per-channel view used by the debug command.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub channel_id: String,
    pub config: SubscriptionConfig,
    pub due_at: DateTime<Utc>,
    pub last_notified: Option<NotificationRecord>,
}

/// Process-wide context shared by the scheduler and the command surface.
///
/// Every novelty decision goes through `check_and_notify` (or one of the
/// command wrappers around it), serialized per (user, channel) pair. Store
/// read-modify-writes additionally hold the user's lock. Lock order is
/// always pair, then user.
pub struct App {
    subscriptions: SubscriptionStore,
    notifications: NotificationStateStore,
    fetcher: Arc<dyn ItemFetcher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    pair_locks: LockTable<(String, String)>,
    user_locks: LockTable<String>,
    reschedule: Notify,
    default_interval_hours: u32,
    fetch_timeout: Duration,
}

impl App {
    pub fn new(
        kv: Arc<dyn KvStore>,
        fetcher: Arc<dyn ItemFetcher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        scheduler: &SchedulerConfig,
    ) -> Self {
        Self {
            subscriptions: SubscriptionStore::subscriptions(kv.clone()),
            notifications: NotificationStateStore::notifications(kv),
            fetcher,
            notifier,
            clock,
            pair_locks: LockTable::new(),
            user_locks: LockTable::new(),
            reschedule: Notify::new(),
            default_interval_hours: scheduler.default_interval_hours,
            fetch_timeout: scheduler.fetch_timeout(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Wakes the scheduler so it recomputes due times.
    pub fn reschedule(&self) {
        self.reschedule.notify_one();
    }

    pub async fn rescheduled(&self) {
        self.reschedule.notified().await;
    }

    pub async fn load_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.subscriptions.load_all().await
    }

    // Check-and-notify

    /// Fetches the channel and, if its latest item is strictly newer than
    /// the last one notified, sends it (when `notify`) and records it.
    pub async fn check_and_notify(
        &self,
        user_id: &str,
        channel_id: &str,
        notify: bool,
    ) -> Result<Outcome> {
        let _pair = self.lock_pair(user_id, channel_id).await;
        self.check_locked(user_id, channel_id, notify).await
    }

    /// Scheduler entry point. Re-reads the subscription under the pair lock
    /// and returns `None` without fetching when it is gone or no longer due,
    /// e.g. because a manual check ran since the batch was planned.
    pub async fn run_due_check(&self, user_id: &str, channel_id: &str) -> Result<Option<Outcome>> {
        let _pair = self.lock_pair(user_id, channel_id).await;

        let now = self.now();
        let due = self
            .subscriptions
            .get(user_id)
            .await?
            .get(channel_id)
            .map(|config| config.is_due(now));
        if due != Some(true) {
            return Ok(None);
        }

        // The due time advances even when the check itself failed, so a
        // broken store record cannot make the pair due forever.
        let outcome = self.check_locked(user_id, channel_id, true).await;
        self.touch(user_id, channel_id).await?;
        Ok(Some(outcome?))
    }

    async fn check_locked(&self, user_id: &str, channel_id: &str, notify: bool) -> Result<Outcome> {
        if !self.subscriptions.get(user_id).await?.contains_key(channel_id) {
            return Ok(Outcome::NotSubscribed);
        }

        let item = match self.fetch_latest(channel_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::warn!("No posts found for {}", channel_id);
                return Ok(Outcome::FetchError);
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", channel_id, e);
                return Ok(Outcome::FetchError);
            }
        };

        let last = self.notifications.get(user_id).await?.remove(channel_id);
        if !item.is_newer_than(last.as_ref()) {
            tracing::debug!("No new post on {} for {}", channel_id, user_id);
            return Ok(Outcome::NoChange);
        }

        // A failed send still records the item: a missed message is
        // preferred over a duplicate on the next check.
        let outcome = if notify {
            match self
                .notifier
                .send(user_id, &format_new_post(channel_id, &item))
                .await
            {
                Ok(()) => {
                    tracing::info!("Notified {} about {}", user_id, item.link);
                    Outcome::Delivered
                }
                Err(e) => {
                    tracing::warn!("Failed to notify {} about {}: {}", user_id, item.link, e);
                    Outcome::DeliveryFailed
                }
            }
        } else {
            Outcome::Recorded
        };

        self.record_notified(user_id, channel_id, &item).await?;
        Ok(outcome)
    }

    async fn fetch_latest(&self, channel_id: &str) -> Result<Option<LatestItem>> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch_latest(channel_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Fetch(format!(
                "no answer within {}s",
                self.fetch_timeout.as_secs()
            ))),
        }
    }

    async fn record_notified(&self, user_id: &str, channel_id: &str, item: &LatestItem) -> Result<()> {
        let _user = self.lock_user(user_id).await;
        let mut records = self.notifications.get(user_id).await?;
        records.insert(
            channel_id.to_string(),
            NotificationRecord::from_item(item, self.now()),
        );
        self.notifications.put(user_id, &records).await
    }

    async fn touch(&self, user_id: &str, channel_id: &str) -> Result<()> {
        let _user = self.lock_user(user_id).await;
        let mut subs = self.subscriptions.get(user_id).await?;
        if let Some(config) = subs.get_mut(channel_id) {
            config.last_check_at = Some(self.now());
            self.subscriptions.put(user_id, &subs).await?;
        }
        Ok(())
    }

    // Commands

    /// Subscribes with the default interval and remembers the current
    /// latest post without sending it.
    pub async fn subscribe(&self, user_id: &str, raw_channel: &str) -> Result<(String, Outcome)> {
        let channel_id = self.fetcher.canonical_channel(raw_channel)?;
        let _pair = self.lock_pair(user_id, &channel_id).await;

        {
            let _user = self.lock_user(user_id).await;
            let mut subs = self.subscriptions.get(user_id).await?;
            if subs.contains_key(&channel_id) {
                return Err(AppError::AlreadySubscribed(channel_id));
            }
            subs.insert(
                channel_id.clone(),
                SubscriptionConfig::new(self.default_interval_hours, self.now()),
            );
            self.subscriptions.put(user_id, &subs).await?;
        }
        tracing::info!("{} subscribed to {}", user_id, channel_id);

        let baseline = match self.check_locked(user_id, &channel_id, false).await {
            Ok(outcome) => self.touch(user_id, &channel_id).await.map(|()| outcome),
            Err(e) => Err(e),
        };
        let outcome = match baseline {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = self.remove_subscription(user_id, &channel_id).await {
                    tracing::error!(
                        "Failed to roll back subscription of {} to {}: {}",
                        user_id,
                        channel_id,
                        rollback
                    );
                }
                return Err(e);
            }
        };
        self.reschedule();

        Ok((channel_id, outcome))
    }

    async fn remove_subscription(&self, user_id: &str, channel_id: &str) -> Result<()> {
        let _user = self.lock_user(user_id).await;
        let mut subs = self.subscriptions.get(user_id).await?;
        if subs.remove(channel_id).is_some() {
            self.subscriptions.put(user_id, &subs).await?;
        }
        Ok(())
    }

    /// Removes the subscription together with its notification state.
    pub async fn unsubscribe(&self, user_id: &str, raw_channel: &str) -> Result<String> {
        let channel_id = self.resolve_channel(raw_channel);
        let _pair = self.lock_pair(user_id, &channel_id).await;
        let _user = self.lock_user(user_id).await;

        let mut subs = self.subscriptions.get(user_id).await?;
        if subs.remove(&channel_id).is_none() {
            return Err(AppError::NotSubscribed(channel_id));
        }
        self.subscriptions.put(user_id, &subs).await?;

        let mut records = self.notifications.get(user_id).await?;
        if records.remove(&channel_id).is_some() {
            self.notifications.put(user_id, &records).await?;
        }

        tracing::info!("{} unsubscribed from {}", user_id, channel_id);
        self.reschedule();
        Ok(channel_id)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .get(user_id)
            .await?
            .into_iter()
            .map(|(channel_id, config)| Subscription {
                user_id: user_id.to_string(),
                channel_id,
                config,
            })
            .collect())
    }

    /// Changes the poll interval and checks right away so the new cadence
    /// starts now.
    pub async fn set_interval(&self, user_id: &str, raw_channel: &str, hours: i64) -> Result<Outcome> {
        if hours < 1 {
            return Err(AppError::InvalidArgument(
                "interval must be at least 1 hour".to_string(),
            ));
        }
        let hours = u32::try_from(hours)
            .ok()
            .filter(|h| *h <= MAX_INTERVAL_HOURS)
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "interval must be at most {} hours",
                    MAX_INTERVAL_HOURS
                ))
            })?;

        let channel_id = self.resolve_channel(raw_channel);
        let _pair = self.lock_pair(user_id, &channel_id).await;

        {
            let _user = self.lock_user(user_id).await;
            let mut subs = self.subscriptions.get(user_id).await?;
            let Some(config) = subs.get_mut(&channel_id) else {
                return Err(AppError::NotSubscribed(channel_id));
            };
            config.interval_hours = hours;
            self.subscriptions.put(user_id, &subs).await?;
        }
        tracing::info!("{} set interval for {} to {}h", user_id, channel_id, hours);

        let outcome = self.check_locked(user_id, &channel_id, true).await?;
        self.touch(user_id, &channel_id).await?;
        self.reschedule();
        Ok(outcome)
    }

    /// Manual check; counts as a regular check for due-time purposes.
    pub async fn check(&self, user_id: &str, raw_channel: &str) -> Result<Outcome> {
        let channel_id = self.resolve_channel(raw_channel);
        let outcome = self.check_and_notify(user_id, &channel_id, true).await?;
        if outcome != Outcome::NotSubscribed {
            self.touch(user_id, &channel_id).await?;
        }
        Ok(outcome)
    }

    pub async fn check_all(&self, user_id: &str) -> Result<Vec<(String, Outcome)>> {
        let channels: Vec<String> = self.subscriptions.get(user_id).await?.into_keys().collect();

        let mut outcomes = Vec::with_capacity(channels.len());
        for channel_id in channels {
            let outcome = self.check(user_id, &channel_id).await?;
            outcomes.push((channel_id, outcome));
        }
        Ok(outcomes)
    }

    /// Forgets what was last sent for the channel. Returns whether there was
    /// anything to forget.
    pub async fn reset(&self, user_id: &str, raw_channel: &str) -> Result<bool> {
        let channel_id = self.resolve_channel(raw_channel);
        let _pair = self.lock_pair(user_id, &channel_id).await;
        let _user = self.lock_user(user_id).await;

        let mut records = self.notifications.get(user_id).await?;
        let removed = records.remove(&channel_id).is_some();
        if removed {
            self.notifications.put(user_id, &records).await?;
            tracing::info!("{} reset notification state for {}", user_id, channel_id);
        }
        Ok(removed)
    }

    pub async fn reset_all(&self, user_id: &str) -> Result<usize> {
        let _user = self.lock_user(user_id).await;

        let records = self.notifications.get(user_id).await?;
        let count = records.len();
        if count > 0 {
            self.notifications.put(user_id, &Default::default()).await?;
            tracing::info!("{} reset notification state for {} channels", user_id, count);
        }
        Ok(count)
    }

    pub async fn status(&self, user_id: &str) -> Result<Vec<ChannelStatus>> {
        let now = self.now();
        let subs = self.subscriptions.get(user_id).await?;
        let mut records = self.notifications.get(user_id).await?;

        Ok(subs
            .into_iter()
            .map(|(channel_id, config)| ChannelStatus {
                due_at: config.due_at(now),
                last_notified: records.remove(&channel_id),
                channel_id,
                config,
            })
            .collect())
    }

    fn resolve_channel(&self, raw_channel: &str) -> String {
        self.fetcher
            .canonical_channel(raw_channel)
            .unwrap_or_else(|_| raw_channel.trim().to_string())
    }

    async fn lock_pair(&self, user_id: &str, channel_id: &str) -> OwnedMutexGuard<()> {
        self.pair_locks
            .lock((user_id.to_string(), channel_id.to_string()))
            .await
    }

    async fn lock_user(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.user_locks.lock(user_id.to_string()).await
    }
}
