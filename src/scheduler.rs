//! Background loop deciding when each subscription gets checked.
//!
//! Instead of ticking at a fixed rate, the loop sleeps until the earliest
//! due time over all subscriptions, then reloads the stores and checks every
//! pair that is due.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::app::App;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::{Outcome, Subscription};

/// Tally of one wake-up batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub checked: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Checks that ended in a store error rather than an outcome.
    pub errors: usize,
}

impl BatchReport {
    fn add(&mut self, outcome: Outcome) {
        self.checked += 1;
        match outcome {
            Outcome::Delivered => self.delivered += 1,
            Outcome::FetchError | Outcome::DeliveryFailed => self.failed += 1,
            Outcome::NoChange | Outcome::Recorded | Outcome::NotSubscribed => {}
        }
    }
}

/// Earliest due time over all subscriptions, `None` when there are none.
pub fn next_wake(subs: &[Subscription], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    subs.iter().map(|sub| sub.due_at(now)).min()
}

pub struct Scheduler {
    app: Arc<App>,
    idle: Duration,
    max_sleep: Duration,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(app: Arc<App>, config: &SchedulerConfig) -> Self {
        Self {
            app,
            idle: config.idle(),
            max_sleep: config.max_sleep(),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Runs until `stop` changes or its sender is dropped.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        tracing::info!(
            "Scheduler started (idle period: {} seconds)",
            self.idle.as_secs()
        );

        let mut backoff = false;
        loop {
            if *stop.borrow() {
                break;
            }

            let mut wait = match self.app.load_subscriptions().await {
                Ok(subs) => self.sleep_for(&subs, self.app.now()),
                Err(e) => {
                    tracing::error!("Failed to load subscriptions: {}", e);
                    self.idle
                }
            };
            // Store errors may leave pairs due; wait out the idle period
            // instead of retrying them right away.
            if backoff {
                wait = wait.max(self.idle);
            }

            if !wait.is_zero() {
                tracing::debug!("Sleeping {} seconds until next check", wait.as_secs());
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.app.rescheduled() => {
                        tracing::debug!("Subscriptions changed, recomputing due times");
                        continue;
                    }
                    _ = stop.changed() => break,
                }
            }

            backoff = self.run_due_batch().await.errors > 0;
        }

        tracing::info!("Scheduler stopped");
    }

    /// How long to sleep before the next batch. Never busy-loops on an
    /// empty store, and never sleeps longer than `max_sleep`.
    pub fn sleep_for(&self, subs: &[Subscription], now: DateTime<Utc>) -> Duration {
        match next_wake(subs, now) {
            None => self.idle,
            Some(at) => (at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_sleep),
        }
    }

    /// Reloads the stores and checks every subscription that is due now.
    /// Per-channel failures are logged and never abort the batch.
    pub async fn run_due_batch(&self) -> BatchReport {
        let now = self.app.now();
        let subs = match self.app.load_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!("Failed to load subscriptions: {}", e);
                return BatchReport::default();
            }
        };

        let due: Vec<Subscription> = subs.into_iter().filter(|s| s.is_due(now)).collect();
        if due.is_empty() {
            tracing::debug!("No subscriptions due");
            return BatchReport::default();
        }
        tracing::debug!("Checking {} due subscription(s)", due.len());

        let app = &self.app;
        let results: Vec<Option<Result<Outcome>>> = stream::iter(due)
            .map(|sub| async move {
                app.run_due_check(&sub.user_id, &sub.channel_id)
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            "Check of {} for {} failed: {}",
                            sub.channel_id,
                            sub.user_id,
                            e
                        )
                    })
                    .transpose()
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for result in results.into_iter().flatten() {
            match result {
                Ok(outcome) => report.add(outcome),
                Err(_) => report.errors += 1,
            }
        }
        if report.delivered > 0 || report.failed > 0 || report.errors > 0 {
            tracing::info!(
                "Checked {} subscription(s): {} delivered, {} failed, {} errors",
                report.checked,
                report.delivered,
                report.failed,
                report.errors
            );
        }
        report
    }
}
