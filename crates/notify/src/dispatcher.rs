//! Fans a flip out to the check's channels.
//!
//! Each dispatch takes a lease on the flip, sends to every subscribed,
//! enabled channel concurrently, and finishes with one atomic store commit:
//! a ledger row per attempted channel, the channels' health updates and the
//! flip's `processed` mark. Channel failures are contained here and never
//! fail the dispatch. A dispatch that dies before its commit leaves the flip
//! unprocessed for [`AlertDispatcher::recover`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use deadman_core::config::DispatchConfig;
use deadman_core::duration::to_chrono;
use deadman_core::{Channel, ChannelKind, Flip, HealthUpdate, Notification};
use deadman_store::{DispatchCommit, Store, StoreError};

use crate::health::{self, CircuitPolicy, Guard};
use crate::registry::TransportRegistry;
use crate::templating::{AlertContext, TemplateRenderer};
use crate::traits::{Alert, Notifier, TransportError};

/// Upper bound on any single wait between attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Slack on top of the send budget for store round trips and rendering.
const LEASE_MARGIN: Duration = Duration::from_secs(10);

/// Errors that abort a whole dispatch. The flip stays unprocessed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("flip {0} is already being dispatched")]
    Busy(Uuid),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => DispatchError::NotFound { entity, id },
            other => DispatchError::Store(other),
        }
    }
}

/// Timeouts, retries and circuit breaking for deliveries.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub send_timeout: Duration,
    /// Attempts per channel per dispatch, including the first.
    pub max_attempts: u32,
    /// Wait after the n-th failed attempt is `n * retry_backoff`.
    pub retry_backoff: Duration,
    pub max_retry_delay: Duration,
    pub circuit: CircuitPolicy,
    /// Lease taken on a flip for one dispatch. Never shorter than
    /// [`DispatchPolicy::send_budget`] plus a margin.
    pub claim_lease: Duration,
}

impl DispatchPolicy {
    /// Longest a single channel delivery can take: every attempt timing out
    /// and every wait between attempts at its cap.
    pub fn send_budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.send_timeout * attempts + self.max_retry_delay * (attempts - 1)
    }

    /// The lease actually taken, stretched to cover the send budget.
    pub fn lease(&self) -> Duration {
        self.claim_lease.max(self.send_budget() + LEASE_MARGIN)
    }
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(cfg: &DispatchConfig) -> Self {
        let mut policy = Self {
            send_timeout: Duration::from_secs(cfg.send_timeout_secs.max(1)),
            max_attempts: cfg.max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            max_retry_delay: MAX_RETRY_DELAY,
            circuit: CircuitPolicy {
                failure_threshold: cfg.failure_threshold,
                cooldown: Duration::from_secs(cfg.circuit_cooldown_secs),
            },
            claim_lease: Duration::from_secs(cfg.claim_lease_secs.max(1)),
        };
        let lease = policy.lease();
        if lease > policy.claim_lease {
            warn!(
                configured_secs = policy.claim_lease.as_secs(),
                lease_secs = lease.as_secs(),
                "Claim lease shorter than the worst-case send, extending it"
            );
            policy.claim_lease = lease;
        }
        policy
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

/// Outcome of delivering one flip to one channel.
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel_id: Uuid,
    pub kind: ChannelKind,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    pub attempts: u32,
    /// Skipped by the circuit breaker; no health update was made.
    pub circuit_open: bool,
}

/// Result of dispatching a flip.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub flip_id: Uuid,
    pub check_id: Uuid,
    /// One entry per attempted channel, matching the ledger rows written.
    pub outcomes: Vec<ChannelOutcome>,
    /// Subscribed channels left out because they are disabled.
    pub skipped_disabled: usize,
    /// The transition does not warrant an alert; nothing was sent.
    pub suppressed: bool,
}

impl DispatchResult {
    fn empty(flip: &Flip, suppressed: bool) -> Self {
        Self {
            flip_id: flip.id,
            check_id: flip.check_id,
            outcomes: Vec::new(),
            skipped_disabled: 0,
            suppressed,
        }
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.delivered()
    }
}

pub struct AlertDispatcher {
    store: Arc<dyn Store>,
    registry: Arc<dyn TransportRegistry>,
    renderer: Arc<TemplateRenderer>,
    policy: DispatchPolicy,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<dyn TransportRegistry>,
        renderer: Arc<TemplateRenderer>,
    ) -> Self {
        Self {
            store,
            registry,
            renderer,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Dispatch a flip to its check's channels and mark it processed.
    ///
    /// Transitions that do not alert (coming up from `new`/`paused`, pausing,
    /// resuming) are marked processed without sending. A flip that is
    /// already processed is left alone.
    pub async fn process(&self, flip: &Flip, now: DateTime<Utc>) -> Result<DispatchResult, DispatchError> {
        let lease = self.claim(flip.id, now).await?;
        let flip = self.store.get_flip(flip.id).await?;

        if flip.is_processed() {
            debug!(flip_id = %flip.id, "Flip already processed");
            return Ok(DispatchResult::empty(&flip, false));
        }

        if !flip.should_alert() {
            self.store
                .commit_dispatch(&DispatchCommit {
                    flip_id: flip.id,
                    notifications: Vec::new(),
                    health: Vec::new(),
                    processed_at: now,
                    lease: Some(lease),
                })
                .await?;
            debug!(
                flip_id = %flip.id,
                old = %flip.old_status,
                new = %flip.new_status,
                "Transition does not alert, marked processed"
            );
            return Ok(DispatchResult::empty(&flip, true));
        }

        self.deliver(&flip, now, lease).await
    }

    /// Re-send the alert for a check's current status.
    ///
    /// Re-dispatches the check's latest flip to every subscribed, enabled
    /// channel, writing fresh ledger rows. Never creates a flip. Returns the
    /// number of channels attempted.
    pub async fn resend(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<usize, DispatchError> {
        let Some(flip) = self.store.latest_flip(check_id).await? else {
            self.store.get_check(check_id).await?;
            info!(check_id = %check_id, "Resend requested for a check with no transitions");
            return Ok(0);
        };
        let lease = self.claim(flip.id, now).await?;
        let result = self.deliver(&flip, now, lease).await?;
        info!(
            check_id = %check_id,
            flip_id = %flip.id,
            attempted = result.attempted(),
            delivered = result.delivered(),
            "Alert resent"
        );
        Ok(result.attempted())
    }

    /// Re-run dispatch for flips left unprocessed for longer than `grace`.
    ///
    /// Flips under a live lease are skipped. Failures are logged and the
    /// flip stays unprocessed for the next sweep.
    pub async fn recover(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<DispatchResult>, DispatchError> {
        let pending = self.store.unprocessed_flips(now - to_chrono(grace)).await?;
        let mut results = Vec::new();

        for flip in pending {
            if flip.is_claimed(now) {
                continue;
            }
            match self.process(&flip, now).await {
                Ok(result) => {
                    info!(
                        flip_id = %flip.id,
                        check_id = %flip.check_id,
                        attempted = result.attempted(),
                        "Recovered unprocessed flip"
                    );
                    results.push(result);
                }
                Err(DispatchError::Busy(_)) => {}
                Err(e) => warn!(flip_id = %flip.id, error = %e, "Recovery dispatch failed"),
            }
        }
        Ok(results)
    }

    /// Take the lease, returning its expiry as the token for the commit.
    async fn claim(&self, flip_id: Uuid, now: DateTime<Utc>) -> Result<DateTime<Utc>, DispatchError> {
        // Microsecond precision, so the token survives a round trip through Postgres.
        let until = (now + to_chrono(self.policy.lease())).trunc_subsecs(6);
        if self.store.claim_flip(flip_id, now, until).await? {
            Ok(until)
        } else {
            Err(DispatchError::Busy(flip_id))
        }
    }

    async fn deliver(
        &self,
        flip: &Flip,
        now: DateTime<Utc>,
        lease: DateTime<Utc>,
    ) -> Result<DispatchResult, DispatchError> {
        let check = self.store.get_check(flip.check_id).await?;
        let (disabled, active): (Vec<Channel>, Vec<Channel>) = self
            .store
            .channels_for_check(check.id)
            .await?
            .into_iter()
            .partition(|c| c.disabled);

        let alert = self
            .renderer
            .render_alert(&AlertContext::new(&check, flip, now))
            .map_err(|e| e.to_string());

        let outcomes = join_all(active.iter().map(|ch| self.deliver_to(ch, &alert, flip, now))).await;

        let notifications = outcomes
            .iter()
            .map(|o| Notification {
                id: Uuid::new_v4(),
                check_id: flip.check_id,
                flip_id: flip.id,
                channel_id: o.channel_id,
                created: now,
                check_status: flip.new_status,
                error: o.error.clone().unwrap_or_default(),
                duration: o.duration,
                attempts: o.attempts,
            })
            .collect();
        let health = outcomes
            .iter()
            .filter(|o| !o.circuit_open)
            .map(|o| HealthUpdate {
                channel_id: o.channel_id,
                at: now,
                duration: o.duration,
                error: o.error.clone().unwrap_or_default(),
            })
            .collect();

        self.store
            .commit_dispatch(&DispatchCommit {
                flip_id: flip.id,
                notifications,
                health,
                processed_at: now,
                lease: Some(lease),
            })
            .await?;

        let result = DispatchResult {
            flip_id: flip.id,
            check_id: flip.check_id,
            outcomes,
            skipped_disabled: disabled.len(),
            suppressed: false,
        };
        info!(
            flip_id = %flip.id,
            check_id = %flip.check_id,
            status = %flip.new_status,
            attempted = result.attempted(),
            delivered = result.delivered(),
            disabled = result.skipped_disabled,
            "Flip dispatched"
        );
        Ok(result)
    }

    async fn deliver_to(
        &self,
        channel: &Channel,
        alert: &Result<Alert, String>,
        flip: &Flip,
        now: DateTime<Utc>,
    ) -> ChannelOutcome {
        if let Guard::CircuitOpen { failures, retry_at } = self.policy.circuit.guard(channel, now) {
            debug!(channel = %channel.id, failures, %retry_at, "Circuit open, skipping channel");
            return ChannelOutcome {
                channel_id: channel.id,
                kind: channel.kind,
                success: false,
                error: Some(format!(
                    "Skipped after {failures} consecutive failures; next attempt after {}",
                    retry_at.to_rfc3339()
                )),
                duration: Duration::ZERO,
                attempts: 0,
                circuit_open: true,
            };
        }

        let started = Instant::now();
        let (result, attempts) = match (health::preflight(channel), alert) {
            (Some(reason), _) => (Err(reason.to_string()), 0),
            (None, Err(msg)) => (Err(msg.clone()), 0),
            (None, Ok(alert)) => match self.registry.notifier_for(channel) {
                Ok(notifier) => self.send_with_retry(notifier.as_ref(), alert, flip).await,
                Err(e) => (Err(e.to_string()), 0),
            },
        };
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;

        match &result {
            Ok(()) => debug!(
                flip_id = %flip.id,
                channel = %channel.id,
                kind = %channel.kind,
                attempts,
                duration_ms,
                "Alert delivered"
            ),
            Err(e) => warn!(
                flip_id = %flip.id,
                channel = %channel.id,
                kind = %channel.kind,
                attempts,
                duration_ms,
                error = %e,
                "Alert delivery failed"
            ),
        }

        ChannelOutcome {
            channel_id: channel.id,
            kind: channel.kind,
            success: result.is_ok(),
            error: result.err(),
            duration,
            attempts,
            circuit_open: false,
        }
    }

    async fn send_with_retry(&self, notifier: &dyn Notifier, alert: &Alert, flip: &Flip) -> (Result<(), String>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.policy.send_timeout, notifier.send(alert)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.policy.send_timeout)),
            };
            let err = match result {
                Ok(()) => return (Ok(()), attempts),
                Err(e) => e,
            };

            if attempts >= self.policy.max_attempts || !err.is_retryable() {
                return (Err(err.to_string()), attempts);
            }
            if self.is_superseded(flip).await {
                debug!(flip_id = %flip.id, "Flip superseded, not retrying");
                return (Err(err.to_string()), attempts);
            }

            let delay = err
                .retry_after()
                .unwrap_or(self.policy.retry_backoff * attempts)
                .min(self.policy.max_retry_delay);
            debug!(
                flip_id = %flip.id,
                channel = notifier.channel_name(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying delivery"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Whether a newer flip exists for the same check.
    async fn is_superseded(&self, flip: &Flip) -> bool {
        match self.store.latest_flip(flip.check_id).await {
            Ok(Some(latest)) => latest.id != flip.id,
            Ok(None) => false,
            Err(e) => {
                warn!(flip_id = %flip.id, error = %e, "Could not look up latest flip");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::TimeZone;
    use deadman_core::{Check, FlipReason, Status};
    use deadman_store::{MemoryStore, NotificationQuery};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ok,
        Fail,
        /// Fail with a retryable error this many times, then succeed.
        Flaky(usize),
        Hang,
    }

    struct MockNotifier {
        send_count: Arc<AtomicUsize>,
        behaviour: Behaviour,
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, _alert: &Alert) -> Result<(), TransportError> {
            let n = self.send_count.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok => Ok(()),
                Behaviour::Fail => Err(TransportError::Config("mock failure".to_string())),
                Behaviour::Flaky(times) if n < times => Err(TransportError::Smtp("421 try later".to_string())),
                Behaviour::Flaky(_) => Ok(()),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }
        fn channel_name(&self) -> &str {
            "mock"
        }
    }

    #[derive(Default)]
    struct MockRegistry {
        notifiers: Mutex<HashMap<Uuid, Arc<dyn Notifier>>>,
    }

    impl MockRegistry {
        fn register(&self, channel_id: Uuid, behaviour: Behaviour) -> Arc<AtomicUsize> {
            let count = Arc::new(AtomicUsize::new(0));
            let notifier = MockNotifier {
                send_count: count.clone(),
                behaviour,
            };
            self.notifiers.lock().unwrap().insert(channel_id, Arc::new(notifier));
            count
        }
    }

    impl TransportRegistry for MockRegistry {
        fn notifier_for(&self, channel: &Channel) -> Result<Arc<dyn Notifier>, TransportError> {
            self.notifiers
                .lock()
                .unwrap()
                .get(&channel.id)
                .cloned()
                .ok_or_else(|| TransportError::Config("no transport".to_string()))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<MockRegistry>,
        dispatcher: AlertDispatcher,
        check: Check,
    }

    fn test_policy() -> DispatchPolicy {
        DispatchPolicy {
            send_timeout: Duration::from_millis(200),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
            circuit: CircuitPolicy::disabled(),
            claim_lease: Duration::from_secs(60),
        }
    }

    async fn fixture(policy: DispatchPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(MockRegistry::default());
        let dispatcher = AlertDispatcher::new(store.clone(), registry.clone(), Arc::new(TemplateRenderer::new()))
            .with_policy(policy);
        let mut check = Check::simple("backup", Duration::from_secs(60), Duration::from_secs(30), t(0));
        check.status = Status::Up;
        store.insert_check(&check).await.unwrap();
        Fixture {
            store,
            registry,
            dispatcher,
            check,
        }
    }

    impl Fixture {
        async fn channel(&self, kind: ChannelKind, behaviour: Behaviour) -> (Channel, Arc<AtomicUsize>) {
            let mut channel = Channel::new(kind, "target", t(0));
            channel.subscribe(self.check.id);
            self.store.insert_channel(&channel).await.unwrap();
            let count = self.registry.register(channel.id, behaviour);
            (channel, count)
        }

        async fn flip(&mut self, old: Status, new: Status, at: DateTime<Utc>) -> Flip {
            let flip = Flip::between(self.check.id, at, old, new, FlipReason::Timeout).unwrap();
            self.check.status = new;
            self.check = self.store.update_check(&self.check, Some(&flip), None).await.unwrap();
            flip
        }

        async fn rows(&self) -> Vec<Notification> {
            self.store.list_notifications(&NotificationQuery::default()).await.unwrap()
        }
    }

    #[tokio::test]
    async fn dispatch_to_all_channels() {
        let mut fx = fixture(test_policy()).await;
        let (a, count_a) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let (b, count_b) = fx.channel(ChannelKind::Email, Behaviour::Ok).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let result = fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert_eq!(result.attempted(), 2);
        assert_eq!(result.delivered(), 2);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);

        let rows = fx.rows().await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.is_success() && r.check_status == Status::Down && r.flip_id == flip.id));

        assert!(fx.store.get_flip(flip.id).await.unwrap().is_processed());
        for id in [a.id, b.id] {
            let ch = fx.store.get_channel(id).await.unwrap();
            assert_eq!(ch.last_notify, Some(t(100)));
            assert_eq!(health::status_label(&ch).as_str(), "OK");
        }
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let mut fx = fixture(test_policy()).await;
        let (bad, _) = fx.channel(ChannelKind::Webhook, Behaviour::Fail).await;
        let (good, count) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let result = fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert_eq!(result.attempted(), 2);
        assert_eq!(result.failed(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let rows = fx.rows().await;
        let bad_row = rows.iter().find(|r| r.channel_id == bad.id).unwrap();
        assert!(bad_row.error.contains("mock failure"));
        assert!(rows.iter().find(|r| r.channel_id == good.id).unwrap().is_success());

        let bad_ch = fx.store.get_channel(bad.id).await.unwrap();
        assert_eq!(health::status_label(&bad_ch).as_str(), "Error");
        assert_eq!(bad_ch.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn disabled_channel_is_excluded_entirely() {
        let mut fx = fixture(test_policy()).await;
        let (off, count_off) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        fx.store.set_channel_disabled(off.id, true).await.unwrap();
        let (_on, _) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let result = fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert_eq!(result.attempted(), 1);
        assert_eq!(result.skipped_disabled, 1);
        assert_eq!(count_off.load(Ordering::SeqCst), 0);
        assert!(fx.rows().await.iter().all(|r| r.channel_id != off.id));
        assert_eq!(fx.store.get_channel(off.id).await.unwrap().last_notify, None);
    }

    #[tokio::test]
    async fn non_alerting_flip_is_processed_without_sending() {
        let mut fx = fixture(test_policy()).await;
        let (_, count) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        fx.check.status = Status::New;
        let flip = fx.flip(Status::New, Status::Up, t(5)).await;

        let result = fx.dispatcher.process(&flip, t(5)).await.unwrap();
        assert!(result.suppressed);
        assert_eq!(result.attempted(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(fx.store.get_flip(flip.id).await.unwrap().is_processed());
    }

    #[tokio::test]
    async fn hanging_channel_times_out() {
        let mut fx = fixture(test_policy()).await;
        let (slow, _) = fx.channel(ChannelKind::Webhook, Behaviour::Hang).await;
        let (_fast, _) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let started = Instant::now();
        let result = fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.delivered(), 1);

        let rows = fx.rows().await;
        let row = rows.iter().find(|r| r.channel_id == slow.id).unwrap();
        assert!(row.error.starts_with("Timed out"), "got: {}", row.error);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried() {
        let mut fx = fixture(DispatchPolicy {
            max_attempts: 3,
            ..test_policy()
        })
        .await;
        let (_, count) = fx.channel(ChannelKind::Email, Behaviour::Flaky(2)).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let result = fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert_eq!(result.delivered(), 1);
        assert_eq!(result.outcomes[0].attempts, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(fx.rows().await[0].attempts, 3);
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let mut fx = fixture(DispatchPolicy {
            max_attempts: 3,
            ..test_policy()
        })
        .await;
        let (_, count) = fx.channel(ChannelKind::Webhook, Behaviour::Fail).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn superseded_flip_is_not_retried() {
        let mut fx = fixture(DispatchPolicy {
            max_attempts: 5,
            ..test_policy()
        })
        .await;
        let (_, count) = fx.channel(ChannelKind::Email, Behaviour::Flaky(10)).await;
        let old = fx.flip(Status::Up, Status::Down, t(100)).await;
        let _newer = fx.flip(Status::Down, Status::Up, t(101)).await;

        let result = fx.dispatcher.process(&old, t(102)).await.unwrap();
        assert_eq!(result.outcomes[0].attempts, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(fx.store.get_flip(old.id).await.unwrap().is_processed());
    }

    #[tokio::test]
    async fn open_circuit_skips_send_but_writes_ledger_row() {
        let mut fx = fixture(DispatchPolicy {
            circuit: CircuitPolicy {
                failure_threshold: Some(3),
                cooldown: Duration::from_secs(3_600),
            },
            ..test_policy()
        })
        .await;
        let mut tripped = Channel::new(ChannelKind::Webhook, "https://broken.example.com", t(0));
        tripped.subscribe(fx.check.id);
        tripped.consecutive_failures = 3;
        tripped.last_notify = Some(t(50));
        tripped.last_error = "connection refused".into();
        fx.store.insert_channel(&tripped).await.unwrap();
        let count = fx.registry.register(tripped.id, Behaviour::Ok);
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let result = fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert!(result.outcomes[0].circuit_open);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let rows = fx.rows().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].error.contains("3 consecutive failures"));

        let after = fx.store.get_channel(tripped.id).await.unwrap();
        assert_eq!(after.consecutive_failures, 3);
        assert_eq!(after.last_notify, Some(t(50)));

        // After the cooldown one probe goes through and closes the circuit.
        let recovery = fx.flip(Status::Down, Status::Up, t(4_000)).await;
        fx.dispatcher.process(&recovery, t(4_000)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.get_channel(tripped.id).await.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn unverified_email_is_recorded_as_error() {
        let mut fx = fixture(test_policy()).await;
        let mut email = Channel::new(ChannelKind::Email, "new@example.com", t(0));
        email.email_verified = false;
        email.subscribe(fx.check.id);
        fx.store.insert_channel(&email).await.unwrap();
        let count = fx.registry.register(email.id, Behaviour::Ok);
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        fx.dispatcher.process(&flip, t(100)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(fx.rows().await[0].error, "Email not verified");
        assert_eq!(fx.store.get_channel(email.id).await.unwrap().last_error, "Email not verified");
    }

    #[tokio::test]
    async fn resend_twice_writes_two_rows_and_no_flip() {
        let mut fx = fixture(test_policy()).await;
        let (_, count) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;
        fx.dispatcher.process(&flip, t(100)).await.unwrap();

        assert_eq!(fx.dispatcher.resend(fx.check.id, t(200)).await.unwrap(), 1);
        assert_eq!(fx.dispatcher.resend(fx.check.id, t(300)).await.unwrap(), 1);

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(fx.rows().await.len(), 3);
        assert_eq!(fx.store.list_flips(Some(fx.check.id), 10).await.unwrap().len(), 1);
        // The original processing time is kept.
        assert_eq!(fx.store.get_flip(flip.id).await.unwrap().processed, Some(t(100)));
    }

    #[tokio::test]
    async fn resend_without_flips_attempts_nothing() {
        let fx = fixture(test_policy()).await;
        fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        assert_eq!(fx.dispatcher.resend(fx.check.id, t(10)).await.unwrap(), 0);

        let missing = Uuid::new_v4();
        assert!(matches!(
            fx.dispatcher.resend(missing, t(10)).await,
            Err(DispatchError::NotFound { entity: "check", .. })
        ));
    }

    #[tokio::test]
    async fn leased_flip_is_busy() {
        let mut fx = fixture(test_policy()).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;
        assert!(fx.store.claim_flip(flip.id, t(100), t(160)).await.unwrap());

        assert!(matches!(
            fx.dispatcher.process(&flip, t(110)).await,
            Err(DispatchError::Busy(id)) if id == flip.id
        ));
    }

    #[tokio::test]
    async fn recovery_picks_up_stale_unprocessed_flips() {
        let mut fx = fixture(test_policy()).await;
        let (_, count) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let stale = fx.flip(Status::Up, Status::Down, t(100)).await;
        let fresh = fx.flip(Status::Down, Status::Up, t(190)).await;

        let results = fx.dispatcher.recover(t(200), Duration::from_secs(60)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].flip_id, stale.id);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(fx.store.get_flip(stale.id).await.unwrap().is_processed());
        assert!(!fx.store.get_flip(fresh.id).await.unwrap().is_processed());

        // A second sweep has nothing left to do for the stale flip.
        let again = fx.dispatcher.recover(t(200), Duration::from_secs(60)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn older_dispatch_does_not_clobber_newer_health() {
        let mut fx = fixture(test_policy()).await;
        let (shared, _) = fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;

        let mut other = Check::simple("other", Duration::from_secs(60), Duration::from_secs(30), t(0));
        other.status = Status::Up;
        fx.store.insert_check(&other).await.unwrap();
        fx.store.subscribe(shared.id, other.id).await.unwrap();
        let other_flip = Flip::between(other.id, t(50), Status::Up, Status::Down, FlipReason::Timeout).unwrap();
        other.status = Status::Down;
        fx.store.update_check(&other, Some(&other_flip), None).await.unwrap();

        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;
        fx.dispatcher.process(&flip, t(100)).await.unwrap();

        // A failing send that started earlier finishes later.
        fx.registry.register(shared.id, Behaviour::Fail);
        fx.dispatcher.process(&other_flip, t(50)).await.unwrap();

        let ch = fx.store.get_channel(shared.id).await.unwrap();
        assert_eq!(ch.last_notify, Some(t(100)));
        assert!(ch.last_error.is_empty());
        assert_eq!(fx.rows().await.len(), 2);
    }

    #[test]
    fn policy_from_config() {
        let cfg = DispatchConfig {
            send_timeout_secs: 5,
            max_attempts: 0,
            retry_backoff_ms: 250,
            failure_threshold: Some(4),
            circuit_cooldown_secs: 900,
            claim_lease_secs: 30,
        };
        let policy = DispatchPolicy::from(&cfg);
        assert_eq!(policy.send_timeout, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.retry_backoff, Duration::from_millis(250));
        assert_eq!(policy.circuit.failure_threshold, Some(4));
        assert_eq!(policy.claim_lease, Duration::from_secs(30));
    }

    #[test]
    fn lease_covers_worst_case_send() {
        let cfg = DispatchConfig {
            send_timeout_secs: 30,
            max_attempts: 5,
            retry_backoff_ms: 1_000,
            failure_threshold: None,
            circuit_cooldown_secs: 60,
            claim_lease_secs: 30,
        };
        let policy = DispatchPolicy::from(&cfg);
        // 5 timeouts of 30s and 4 waits of at most 30s.
        assert_eq!(policy.send_budget(), Duration::from_secs(270));
        assert!(policy.claim_lease >= policy.send_budget());
        assert_eq!(policy.lease(), policy.claim_lease);

        let manual = DispatchPolicy { claim_lease: Duration::from_secs(1), ..policy };
        assert!(manual.lease() > manual.send_budget());
    }

    #[tokio::test]
    async fn dispatch_releases_its_lease() {
        let mut fx = fixture(test_policy()).await;
        fx.channel(ChannelKind::Webhook, Behaviour::Ok).await;
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        fx.dispatcher.process(&flip, t(100)).await.unwrap();
        let stored = fx.store.get_flip(flip.id).await.unwrap();
        assert!(stored.is_processed());
        assert_eq!(stored.claimed_until, None);
    }

    /// Takes the flip over on behalf of another dispatcher mid-send, as if
    /// this dispatch had outlived its lease.
    struct TakeoverNotifier {
        store: Arc<MemoryStore>,
        flip_id: Uuid,
        at: DateTime<Utc>,
        until: DateTime<Utc>,
    }

    #[async_trait::async_trait]
    impl Notifier for TakeoverNotifier {
        async fn send(&self, _alert: &Alert) -> Result<(), TransportError> {
            assert!(self.store.claim_flip(self.flip_id, self.at, self.until).await.unwrap());
            Ok(())
        }
        fn channel_name(&self) -> &str {
            "takeover"
        }
    }

    #[tokio::test]
    async fn late_commit_keeps_a_newer_lease() {
        let mut fx = fixture(test_policy()).await;
        let mut channel = Channel::new(ChannelKind::Webhook, "target", t(0));
        channel.subscribe(fx.check.id);
        fx.store.insert_channel(&channel).await.unwrap();
        let flip = fx.flip(Status::Up, Status::Down, t(100)).await;

        let lease_end = t(100) + to_chrono(fx.dispatcher.policy().lease());
        let takeover = TakeoverNotifier {
            store: fx.store.clone(),
            flip_id: flip.id,
            at: lease_end + chrono::Duration::seconds(1),
            until: t(1_000),
        };
        fx.registry.notifiers.lock().unwrap().insert(channel.id, Arc::new(takeover));

        fx.dispatcher.process(&flip, t(100)).await.unwrap();
        let stored = fx.store.get_flip(flip.id).await.unwrap();
        assert!(stored.is_processed());
        assert_eq!(stored.claimed_until, Some(t(1_000)));
        assert!(!fx.store.claim_flip(flip.id, t(900), t(1_200)).await.unwrap());
    }
}
