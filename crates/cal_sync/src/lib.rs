//! Best-effort synchronization with an external calendar provider.
//!
//! The domain service records provider work as [`SyncIntent`]s in its
//! outbox; this crate drains that outbox into a retry queue and performs
//! the calls through an [`ExternalCalendar`] implementation. Sync is never
//! transactional with local writes: a failed provider call is retried a
//! bounded number of times and then dropped with a report, and local state
//! is never rolled back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use cal_domain::activity::Activity;
use cal_domain::service::{ActivityService, SyncIntent};

/// Credentials for one connected provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
    pub account: String,
    pub access_token: String,
}

impl AccountBinding {
    pub fn new(account: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            access_token: access_token.into(),
        }
    }
}

/// Provider calls the sync service knows how to make. The core decides
/// when; implementations decide how.
pub trait ExternalCalendar: Send + Sync {
    /// Returns the provider-side event id when the provider reports one.
    fn insert_event(&self, activity: &Activity, token: &str) -> Result<Option<String>>;
    fn update_event(&self, activity: &Activity, token: &str) -> Result<()>;
    fn delete_event(&self, activity: &Activity, token: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct SyncTask {
    intent: SyncIntent,
    attempts: u32,
}

/// Outcome of one `run_pending` pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn empty() -> Self {
        Self {
            attempted: 0,
            succeeded: 0,
            requeued: 0,
            dropped: 0,
            finished_at: Utc::now(),
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync: {} attempted, {} ok, {} requeued, {} dropped",
            self.attempted, self.succeeded, self.requeued, self.dropped
        )
    }
}

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub struct SyncService {
    domain: Arc<ActivityService>,
    provider: Arc<dyn ExternalCalendar>,
    binding: Mutex<Option<AccountBinding>>,
    pending: Mutex<VecDeque<SyncTask>>,
    max_attempts: u32,
}

impl SyncService {
    pub fn new(domain: Arc<ActivityService>, provider: Arc<dyn ExternalCalendar>) -> Self {
        Self {
            domain,
            provider,
            binding: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn connect(&self, binding: AccountBinding) {
        info!(account = %binding.account, "calendar account connected");
        *self.binding.lock() = Some(binding);
    }

    pub fn disconnect(&self) {
        *self.binding.lock() = None;
        info!("calendar account disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.binding.lock().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Move queued intents out of the domain outbox into the retry queue.
    pub fn pump(&self) -> usize {
        let intents = self.domain.drain_sync_intents();
        let count = intents.len();
        if count > 0 {
            let mut pending = self.pending.lock();
            for intent in intents {
                pending.push_back(SyncTask {
                    intent,
                    attempts: 0,
                });
            }
            debug!(count, "sync intents queued");
        }
        count
    }

    /// Pump the outbox, then perform every queued task once. Failures are
    /// requeued until their attempt budget runs out, then dropped.
    #[instrument(skip(self))]
    pub fn run_pending(&self) -> SyncReport {
        self.pump();
        let mut report = SyncReport::empty();
        let Some(binding) = self.binding.lock().clone() else {
            if self.pending_count() > 0 {
                info!(
                    pending = self.pending_count(),
                    "no calendar account bound; sync deferred"
                );
            }
            return report;
        };

        // Only the tasks queued at the start of the pass; requeued
        // failures wait for the next pass.
        let batch = self.pending_count();
        for _ in 0..batch {
            let Some(mut task) = self.pending.lock().pop_front() else {
                break;
            };
            report.attempted += 1;
            task.attempts += 1;
            match self.perform(&task.intent, &binding) {
                Ok(()) => report.succeeded += 1,
                Err(error) => {
                    let id = task.intent.activity().id.clone();
                    if task.attempts < self.max_attempts {
                        warn!(id = %id, attempt = task.attempts, %error, "sync call failed; will retry");
                        report.requeued += 1;
                        self.pending.lock().push_back(task);
                    } else {
                        warn!(id = %id, attempts = task.attempts, %error, "sync call dropped after final attempt");
                        report.dropped += 1;
                    }
                }
            }
        }
        report.finished_at = Utc::now();
        info!(%report, "sync pass finished");
        report
    }

    fn perform(&self, intent: &SyncIntent, binding: &AccountBinding) -> Result<()> {
        match intent {
            SyncIntent::Insert(activity) => {
                let external = self
                    .provider
                    .insert_event(activity, &binding.access_token)?;
                if let Some(external_id) = external {
                    debug!(id = %activity.id, external_id = %external_id, "event inserted");
                }
                Ok(())
            }
            SyncIntent::Update(activity) => {
                self.provider.update_event(activity, &binding.access_token)
            }
            SyncIntent::Delete(activity) => {
                self.provider.delete_event(activity, &binding.access_token)
            }
        }
    }
}
