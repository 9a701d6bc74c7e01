use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::{NotificationRecord, Subscription, SubscriptionConfig};

use super::kv::KvStore;

const SUBSCRIPTIONS_PREFIX: &str = "subscriptions:";
const NOTIFIED_PREFIX: &str = "notified:";

/// Typed view over the key/value store: one JSON object per user, mapping
/// channel id to `V`. Reads and writes always cover the whole user record.
pub struct UserStore<V> {
    kv: Arc<dyn KvStore>,
    prefix: &'static str,
    _marker: PhantomData<fn() -> V>,
}

pub type SubscriptionStore = UserStore<SubscriptionConfig>;
pub type NotificationStateStore = UserStore<NotificationRecord>;

impl SubscriptionStore {
    pub fn subscriptions(kv: Arc<dyn KvStore>) -> Self {
        Self::with_prefix(kv, SUBSCRIPTIONS_PREFIX)
    }

    /// Every subscription of every user, flattened. A user whose record
    /// cannot be read is logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<Subscription>> {
        let mut all = Vec::new();
        for user_id in self.list_users().await? {
            let subs = match self.get(&user_id).await {
                Ok(subs) => subs,
                Err(e) => {
                    tracing::warn!("Skipping subscriptions of {}: {}", user_id, e);
                    continue;
                }
            };
            for (channel_id, config) in subs {
                all.push(Subscription {
                    user_id: user_id.clone(),
                    channel_id,
                    config,
                });
            }
        }
        Ok(all)
    }
}

impl NotificationStateStore {
    pub fn notifications(kv: Arc<dyn KvStore>) -> Self {
        Self::with_prefix(kv, NOTIFIED_PREFIX)
    }
}

impl<V> UserStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn with_prefix(kv: Arc<dyn KvStore>, prefix: &'static str) -> Self {
        Self {
            kv,
            prefix,
            _marker: PhantomData,
        }
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}{}", self.prefix, user_id)
    }

    pub async fn get(&self, user_id: &str) -> Result<BTreeMap<String, V>> {
        match self.kv.get(&self.key(user_id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Overwrites the user's whole record. An empty mapping removes the key.
    pub async fn put(&self, user_id: &str, records: &BTreeMap<String, V>) -> Result<()> {
        let key = self.key(user_id);
        if records.is_empty() {
            self.kv.delete(&key).await
        } else {
            self.kv.set(&key, serde_json::to_value(records)?).await
        }
    }

    pub async fn list_users(&self) -> Result<Vec<String>> {
        let keys = self.kv.keys_with_prefix(self.prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(self.prefix).map(str::to_string))
            .collect())
    }
}
