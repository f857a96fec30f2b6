//! Campaign content scheduler
//!
//! Every tick takes one "now", loads all pending items due at that instant
//! and attempts each once. Failures are re-armed with exponential backoff
//! until the retry policy gives up. Credentials are opened before the batch
//! is split, so items whose campaigns resolve to the same destination token
//! are delivered one after another even when each campaign sealed it
//! separately. Different tokens may run side by side up to
//! `max_concurrency`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::credentials::CredentialResolver;
use crate::destination::DestinationSender;
use crate::error::CredentialError;
use crate::events::{EngineEvent, EventBus};
use crate::periodic::Job;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{ContentStore, DueContent};
use crate::types::{ContentItem, ContentStatus};

/// Counts for one completed tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub posted: usize,
    pub retried: usize,
    pub failed: usize,
    /// Items of paused campaigns, left untouched
    pub skipped: usize,
    /// Outcomes that could not be written back
    pub store_errors: usize,
}

impl TickReport {
    pub fn processed(&self) -> usize {
        self.posted + self.retried + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// A previous tick was still running
    Skipped,
}

/// A due item paired with its opened credential
///
/// `token` is `None` when the item has no active campaign and will never
/// reach the sender.
struct Prepared {
    due: DueContent,
    token: Option<std::result::Result<SecretString, CredentialError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Posted,
    Retried,
    Failed,
    Skipped,
}

pub struct Scheduler {
    store: Arc<dyn ContentStore>,
    credentials: Arc<dyn CredentialResolver>,
    sender: Arc<dyn DestinationSender>,
    policy: RetryPolicy,
    max_concurrency: usize,
    events: EventBus,
    running: AtomicBool,
}

/// Releases the tick guard, including when a tick is cancelled
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ContentStore>,
        credentials: Arc<dyn CredentialResolver>,
        sender: Arc<dyn DestinationSender>,
    ) -> Self {
        Self {
            store,
            credentials,
            sender,
            policy: RetryPolicy::default(),
            max_concurrency: 1,
            events: EventBus::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Build a scheduler using the retry and concurrency settings of `config`
    pub fn from_config(
        store: Arc<dyn ContentStore>,
        credentials: Arc<dyn CredentialResolver>,
        sender: Arc<dyn DestinationSender>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(store, credentials, sender)
            .with_policy(RetryPolicy::from_config(config))
            .with_max_concurrency(config.max_concurrency)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one tick at the current time
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick treating `now` as the current instant
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous tick still running, skipping");
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let due = match self.store.find_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load due content");
                return TickOutcome::Completed(TickReport::default());
            }
        };

        if due.is_empty() {
            return TickOutcome::Completed(TickReport::default());
        }
        info!(count = due.len(), "processing due content");

        let mut prepared = Vec::with_capacity(due.len());
        for due in due {
            prepared.push(self.prepare(due).await);
        }

        let batches: Vec<Vec<(ItemResult, bool)>> = stream::iter(group_by_token(prepared))
            .map(|group| async move {
                let mut results = Vec::with_capacity(group.len());
                for item in group {
                    results.push(self.process(item, now).await);
                }
                results
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = TickReport::default();
        for (result, persisted) in batches.into_iter().flatten() {
            match result {
                ItemResult::Posted => report.posted += 1,
                ItemResult::Retried => report.retried += 1,
                ItemResult::Failed => report.failed += 1,
                ItemResult::Skipped => report.skipped += 1,
            }
            if !persisted {
                report.store_errors += 1;
            }
        }

        info!(
            posted = report.posted,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            store_errors = report.store_errors,
            "tick complete"
        );
        TickOutcome::Completed(report)
    }

    /// Open the credential of an item that is going to be sent
    async fn prepare(&self, due: DueContent) -> Prepared {
        let token = match &due.campaign {
            Some(campaign) if campaign.is_active() => {
                Some(self.credentials.decrypt(&campaign.credential).await)
            }
            _ => None,
        };
        Prepared { due, token }
    }

    /// Attempt one item; returns its outcome and whether it was persisted
    async fn process(&self, prepared: Prepared, now: DateTime<Utc>) -> (ItemResult, bool) {
        let Prepared { due, token } = prepared;
        let DueContent { mut item, campaign } = due;

        let campaign = match campaign {
            Some(campaign) => campaign,
            None => {
                warn!(content_id = %item.id, campaign_id = %item.campaign_id, "campaign not found");
                let persisted = self.fail_without_send(&mut item, now, "campaign not found").await;
                return (ItemResult::Failed, persisted);
            }
        };

        if !campaign.is_active() {
            debug!(content_id = %item.id, campaign_id = %campaign.id, "campaign paused, skipping");
            self.events.emit(EngineEvent::ContentSkipped {
                content_id: item.id,
                campaign_id: campaign.id,
            });
            return (ItemResult::Skipped, true);
        }

        let resolved = match token {
            Some(resolved) => resolved,
            None => self.credentials.decrypt(&campaign.credential).await,
        };
        let token = match resolved {
            Ok(token) => token,
            Err(e) => {
                warn!(content_id = %item.id, campaign_id = %campaign.id, error = %e, "credential unavailable");
                let persisted = self.fail_without_send(&mut item, now, &e.to_string()).await;
                return (ItemResult::Failed, persisted);
            }
        };

        let result = self.sender.send(&token, &item.text).await;
        item.attempts = item.attempts.saturating_add(1);
        item.last_attempt = Some(now);

        let outcome = match result {
            Ok(()) => {
                item.status = ContentStatus::Posted;
                info!(content_id = %item.id, attempts = item.attempts, "content posted");
                ItemResult::Posted
            }
            Err(e) => {
                item.last_error = Some(e.to_string());
                match self.policy.decide(item.attempts, &e, now) {
                    RetryDecision::Retry { next_attempt_at } => {
                        item.status = ContentStatus::Pending;
                        item.scheduled_time = next_attempt_at;
                        warn!(
                            content_id = %item.id,
                            attempts = item.attempts,
                            next_attempt = %next_attempt_at,
                            error = %e,
                            "delivery failed, retry scheduled"
                        );
                        ItemResult::Retried
                    }
                    RetryDecision::GiveUp { reason } => {
                        item.status = ContentStatus::Failed;
                        error!(
                            content_id = %item.id,
                            attempts = item.attempts,
                            error = %e,
                            reason = %reason,
                            "delivery failed permanently"
                        );
                        ItemResult::Failed
                    }
                }
            }
        };

        let persisted = self.persist(&item).await;
        self.emit_outcome(&item, outcome);
        (outcome, persisted)
    }

    /// Fail an item that never reached the destination
    async fn fail_without_send(&self, item: &mut ContentItem, now: DateTime<Utc>, reason: &str) -> bool {
        item.attempts = item.attempts.saturating_add(1);
        item.last_attempt = Some(now);
        item.last_error = Some(reason.to_string());
        item.status = ContentStatus::Failed;

        let persisted = self.persist(item).await;
        self.emit_outcome(item, ItemResult::Failed);
        persisted
    }

    async fn persist(&self, item: &ContentItem) -> bool {
        match self.store.update(item).await {
            Ok(()) => true,
            Err(e) => {
                error!(content_id = %item.id, status = %item.status, error = %e, "failed to record delivery outcome");
                false
            }
        }
    }

    fn emit_outcome(&self, item: &ContentItem, outcome: ItemResult) {
        let event = match outcome {
            ItemResult::Posted => EngineEvent::ContentPosted {
                content_id: item.id.clone(),
                attempts: item.attempts,
            },
            ItemResult::Retried => EngineEvent::ContentRetryScheduled {
                content_id: item.id.clone(),
                attempts: item.attempts,
                next_attempt: item.scheduled_time,
                error: item.last_error.clone().unwrap_or_default(),
            },
            ItemResult::Failed => EngineEvent::ContentFailed {
                content_id: item.id.clone(),
                attempts: item.attempts,
                error: item.last_error.clone().unwrap_or_default(),
            },
            ItemResult::Skipped => return,
        };
        self.events.emit(event);
    }
}

/// Split a batch so items sending with the same token stay in one
/// sequential group
///
/// Groups are keyed on a digest of the opened token, never on the sealed
/// form, which differs per seal. Items that will not be sent share one group.
fn group_by_token(prepared: Vec<Prepared>) -> Vec<Vec<Prepared>> {
    let mut index: HashMap<Option<[u8; 32]>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Prepared>> = Vec::new();

    for item in prepared {
        let key = match &item.token {
            Some(Ok(token)) => Some(token_digest(token)),
            _ => None,
        };
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(item);
    }
    groups
}

fn token_digest(token: &SecretString) -> [u8; 32] {
    Sha256::digest(token.expose_secret().as_bytes()).into()
}

#[async_trait]
impl Job for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(&self) {
        if self.tick().await == TickOutcome::Skipped {
            info!("scheduler tick skipped, previous tick still running");
        }
    }
}
