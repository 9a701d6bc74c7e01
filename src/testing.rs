//! Doubles for the external collaborators, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::App;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::db::MemoryStore;
use crate::error::{AppError, Result};
use crate::feed::ItemFetcher;
use crate::models::LatestItem;
use crate::notify::Notifier;

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn post(channel: &str, secs: i64) -> LatestItem {
    LatestItem {
        title: format!("Post {secs}"),
        link: format!("https://boosty.to/{channel}/posts/{secs}"),
        published_at: at(secs),
    }
}

#[derive(Clone)]
enum Script {
    Item(LatestItem),
    Missing,
    Error,
    Hang,
}

/// Fetcher whose answer per channel is set by the test.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, channel: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(channel.to_string(), script);
    }

    pub fn publish(&self, channel: &str, secs: i64) {
        self.script(channel, Script::Item(post(channel, secs)));
    }

    pub fn fail(&self, channel: &str) {
        self.script(channel, Script::Error);
    }

    pub fn empty(&self, channel: &str) {
        self.script(channel, Script::Missing);
    }

    pub fn hang(&self, channel: &str) {
        self.script(channel, Script::Hang);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemFetcher for ScriptedFetcher {
    async fn fetch_latest(&self, channel_id: &str) -> Result<Option<LatestItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or(Script::Missing);
        match script {
            Script::Item(item) => Ok(Some(item)),
            Script::Missing => Ok(None),
            Script::Error => Err(AppError::Fetch(format!("{channel_id} is down"))),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

/// Notifier that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::Delivery("gateway unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(at(secs)),
        })
    }

    pub fn set(&self, secs: i64) {
        *self.now.lock().unwrap() = at(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct Harness {
    pub app: Arc<App>,
    pub kv: Arc<MemoryStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&SchedulerConfig::default())
    }

    pub fn with_config(config: &SchedulerConfig) -> Self {
        let fetcher = ScriptedFetcher::new();
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::starting_at(1_000);
        let kv = Arc::new(MemoryStore::new());
        let app = Arc::new(App::new(
            kv.clone(),
            fetcher.clone(),
            notifier.clone(),
            clock.clone(),
            config,
        ));
        Self {
            app,
            kv,
            fetcher,
            notifier,
            clock,
        }
    }
}
