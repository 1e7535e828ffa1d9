//! The status engine: the single writer of check status.
//!
//! Every mutation follows the same path: take the per-check lock, load the
//! check, apply the event to its ping history, re-derive the status, and
//! write check, flip and ping together with a version compare-and-swap. A lost
//! race against another process reloads and retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use deadman_core::{
    Check, CheckKind, ConfigurationError, Flip, FlipReason, KeywordFilter, Ping, PingInput, PingKind, Status,
};
use deadman_store::{Store, StoreError};

use crate::keywords;
use crate::locks::CheckLocks;
use crate::schedule::{self, Evaluation};

/// Default number of compare-and-swap attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Errors from status engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("check not found: {0}")]
    NotFound(Uuid),

    #[error("check {check_id} kept changing underneath us after {attempts} attempts")]
    ConcurrencyConflict { check_id: Uuid, attempts: u32 },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity: "check", id } => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}

/// A check after an operation, and the flip it produced, if any.
#[derive(Debug, Clone)]
pub struct Transition {
    pub check: Check,
    pub flip: Option<Flip>,
}

/// Result of ingesting one ping.
#[derive(Debug, Clone)]
pub struct Ingested {
    /// The stored ping, with its kind after classification.
    pub ping: Ping,
    pub check: Check,
    pub flip: Option<Flip>,
}

/// Partial update of a check's configuration.
#[derive(Debug, Clone, Default)]
pub struct CheckUpdate {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub kind: Option<CheckKind>,
    pub timeout: Option<std::time::Duration>,
    pub schedule: Option<String>,
    pub tz: Option<String>,
    pub grace: Option<std::time::Duration>,
    pub manual_resume: Option<bool>,
    pub filter: Option<KeywordFilter>,
}

impl CheckUpdate {
    fn apply_to(self, check: &mut Check) {
        if let Some(v) = self.name {
            check.name = v;
        }
        if let Some(v) = self.tags {
            check.tags = v;
        }
        if let Some(v) = self.kind {
            check.kind = v;
        }
        if let Some(v) = self.timeout {
            check.timeout = v;
        }
        if let Some(v) = self.schedule {
            check.schedule = v;
        }
        if let Some(v) = self.tz {
            check.tz = v;
        }
        if let Some(v) = self.grace {
            check.grace = v;
        }
        if let Some(v) = self.manual_resume {
            check.manual_resume = v;
        }
        if let Some(v) = self.filter {
            check.filter = v;
        }
    }
}

/// What happened to a check, for picking the flip reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Ping(PingKind),
    Tick,
    Pause,
    Resume,
    Configure,
}

pub struct StatusEngine {
    store: Arc<dyn Store>,
    locks: CheckLocks,
    max_attempts: u32,
}

impl StatusEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: CheckLocks::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Validate and store a new check.
    pub async fn register(&self, mut check: Check, now: DateTime<Utc>) -> Result<Check, EngineError> {
        schedule::validate(&check)?;
        check.status = schedule::derive_status(&check, now)?.status;
        check.status_computed_at = Some(now);
        check.version = 0;
        self.store.insert_check(&check).await?;
        info!(check_id = %check.id, name = %check.name, kind = %check.kind, "Check registered");
        Ok(check)
    }

    pub async fn get(&self, check_id: Uuid) -> Result<Check, EngineError> {
        Ok(self.store.get_check(check_id).await?)
    }

    /// Re-derive the status at `now` without mutating the check.
    pub async fn status_at(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Evaluation, EngineError> {
        let check = self.store.get_check(check_id).await?;
        Ok(schedule::derive_status(&check, now)?)
    }

    /// Record a ping and update the check's status.
    ///
    /// Email pings are classified by the check's keyword filter. A terminal
    /// ping resumes a paused check unless it is set to resume manually, in
    /// which case the ping is stored as `ignore`.
    pub async fn ingest(
        &self,
        check_id: Uuid,
        input: PingInput,
        now: DateTime<Utc>,
    ) -> Result<Ingested, EngineError> {
        let (transition, ping) = self
            .apply(check_id, now, Some(&input), |check| {
                let mut kind = keywords::classify(&check.filter, &input);
                if check.paused && check.manual_resume {
                    kind = PingKind::Ignore;
                }
                record_ping(check, kind, now);
                Ok(Event::Ping(kind))
            })
            .await?;

        let ping = ping.unwrap_or_else(|| Ping::from_input(check_id, input.kind, input.clone(), now));
        debug!(check_id = %check_id, kind = %ping.kind, status = %transition.check.status, "Ping ingested");

        Ok(Ingested {
            ping,
            check: transition.check,
            flip: transition.flip,
        })
    }

    /// Re-evaluate the check against the clock.
    ///
    /// Idempotent: evaluating again at the same instant is a no-op.
    pub async fn evaluate(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Transition, EngineError> {
        let (transition, _) = self.apply(check_id, now, None, |_| Ok(Event::Tick)).await?;
        Ok(transition)
    }

    pub async fn pause(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Transition, EngineError> {
        let (transition, _) = self
            .apply(check_id, now, None, |check| {
                check.paused = true;
                check.last_start = None;
                Ok(Event::Pause)
            })
            .await?;
        Ok(transition)
    }

    /// Unpause a check, clearing its ping history so it starts over as `new`.
    pub async fn resume(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Transition, EngineError> {
        let (transition, _) = self
            .apply(check_id, now, None, |check| {
                if check.paused {
                    check.paused = false;
                    check.last_ping = None;
                    check.last_ping_failed = false;
                    check.last_start = None;
                }
                Ok(Event::Resume)
            })
            .await?;
        Ok(transition)
    }

    /// Change a check's configuration.
    ///
    /// The update is validated before anything is written; a rejected update
    /// leaves the stored check unmodified.
    pub async fn configure(
        &self,
        check_id: Uuid,
        update: CheckUpdate,
        now: DateTime<Utc>,
    ) -> Result<Transition, EngineError> {
        let (transition, _) = self
            .apply(check_id, now, None, move |check| {
                update.clone().apply_to(check);
                schedule::validate(check)?;
                Ok(Event::Configure)
            })
            .await?;
        Ok(transition)
    }

    /// Mutate, re-derive and write one check. With `input`, the ping it
    /// describes is stored in the same write as the check and flip.
    async fn apply<F>(
        &self,
        check_id: Uuid,
        now: DateTime<Utc>,
        input: Option<&PingInput>,
        mut mutate: F,
    ) -> Result<(Transition, Option<Ping>), EngineError>
    where
        F: FnMut(&mut Check) -> Result<Event, EngineError>,
    {
        let _guard = self.locks.acquire(check_id).await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let current = self.store.get_check(check_id).await?;
            let mut next = current.clone();
            let event = mutate(&mut next)?;
            let ping = match (event, input) {
                (Event::Ping(kind), Some(input)) => Some(Ping::from_input(check_id, kind, input.clone(), now)),
                _ => None,
            };

            let evaluation = schedule::derive_status(&next, now)?;
            next.status = evaluation.status;
            if next == current {
                return Ok((Transition { check: current, flip: None }, ping));
            }
            next.status_computed_at = Some(now);

            let reason = flip_reason(event, next.status, evaluation.reason);
            let flip = match Flip::between(check_id, now, current.status, next.status, reason) {
                Some(mut flip) => {
                    // Keep flips strictly ordered even if the clock stalls.
                    if let Some(latest) = self.store.latest_flip(check_id).await? {
                        let floor = latest.created + chrono::Duration::microseconds(1);
                        if flip.created < floor {
                            flip.created = floor;
                        }
                    }
                    Some(flip)
                }
                None => None,
            };

            match self.store.update_check(&next, flip.as_ref(), ping.as_ref()).await {
                Ok(stored) => {
                    if let Some(flip) = &flip {
                        info!(
                            check_id = %check_id,
                            flip_id = %flip.id,
                            old = %flip.old_status,
                            new = %flip.new_status,
                            reason = %flip.reason,
                            "Status changed"
                        );
                    }
                    return Ok((Transition { check: stored, flip }, ping));
                }
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    debug!(check_id = %check_id, attempt, error = %e, "Write conflict, reloading check");
                }
                Err(e) if e.is_conflict() => {
                    warn!(check_id = %check_id, attempts = attempt, error = %e, "Giving up after repeated conflicts");
                    return Err(EngineError::ConcurrencyConflict { check_id, attempts: attempt });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn record_ping(check: &mut Check, kind: PingKind, now: DateTime<Utc>) {
    check.n_pings += 1;
    match kind {
        PingKind::Start => check.last_start = Some(now),
        PingKind::Success | PingKind::Fail => {
            check.paused = false;
            check.last_ping = Some(now);
            check.last_ping_failed = kind == PingKind::Fail;
            check.last_start = None;
        }
        PingKind::Log | PingKind::Ignore => {}
    }
}

fn flip_reason(event: Event, new_status: Status, derived: Option<FlipReason>) -> FlipReason {
    match new_status.alert_level() {
        Status::Paused => FlipReason::Pause,
        Status::Down => derived.unwrap_or(FlipReason::Timeout),
        Status::New => FlipReason::Resume,
        _ => match event {
            Event::Ping(PingKind::Start) => FlipReason::Start,
            Event::Resume => FlipReason::Resume,
            _ => FlipReason::Success,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use deadman_store::MemoryStore;

    const BASE: i64 = 1_699_999_980;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(BASE + secs, 0).unwrap()
    }

    fn engine() -> StatusEngine {
        StatusEngine::new(Arc::new(MemoryStore::new()))
    }

    async fn simple_check(engine: &StatusEngine, timeout: u64, grace: u64) -> Check {
        let check = Check::simple("backup", Duration::from_secs(timeout), Duration::from_secs(grace), t(0));
        engine.register(check, t(0)).await.unwrap()
    }

    async fn flips(engine: &StatusEngine, check_id: Uuid) -> Vec<Flip> {
        let mut flips = engine.store().list_flips(Some(check_id), 100).await.unwrap();
        flips.reverse();
        flips
    }

    #[tokio::test]
    async fn simple_check_goes_grace_then_down() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;

        let first = engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        assert_eq!(first.check.status, Status::Up);
        let flip = first.flip.unwrap();
        assert_eq!((flip.old_status, flip.new_status), (Status::New, Status::Up));
        assert!(!flip.should_alert());

        let grace = engine.evaluate(check.id, t(61)).await.unwrap();
        assert_eq!(grace.check.status, Status::Grace);
        assert!(grace.flip.is_none());

        let down = engine.evaluate(check.id, t(91)).await.unwrap();
        assert_eq!(down.check.status, Status::Down);
        let flip = down.flip.unwrap();
        assert_eq!((flip.old_status, flip.new_status), (Status::Up, Status::Down));
        assert_eq!(flip.reason, FlipReason::Timeout);
        assert_eq!(flip.created, t(91));
        assert!(flip.should_alert());

        assert_eq!(flips(&engine, check.id).await.len(), 2);
    }

    #[tokio::test]
    async fn re_evaluation_is_idempotent() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();

        let a = engine.evaluate(check.id, t(100)).await.unwrap();
        let b = engine.evaluate(check.id, t(100)).await.unwrap();
        let c = engine.evaluate(check.id, t(200)).await.unwrap();
        assert!(a.flip.is_some());
        assert!(b.flip.is_none());
        assert!(c.flip.is_none());
        assert_eq!(b.check.version, a.check.version);
        assert_eq!(flips(&engine, check.id).await.len(), 2);
    }

    #[tokio::test]
    async fn cached_status_agrees_with_derivation() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();

        for secs in [10, 61, 75, 91, 300] {
            let after = engine.evaluate(check.id, t(secs)).await.unwrap().check;
            let derived = engine.status_at(check.id, t(secs)).await.unwrap();
            assert_eq!(after.status, derived.status, "at t={secs}");
        }
    }

    #[tokio::test]
    async fn success_ping_recovers_down_check() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::of_kind(PingKind::Fail), t(0)).await.unwrap();
        assert_eq!(engine.get(check.id).await.unwrap().status, Status::Down);

        let up = engine.ingest(check.id, PingInput::default(), t(10)).await.unwrap();
        let flip = up.flip.unwrap();
        assert_eq!((flip.old_status, flip.new_status), (Status::Down, Status::Up));
        assert_eq!(flip.reason, FlipReason::Success);
        assert!(flip.should_alert());
    }

    #[tokio::test]
    async fn fail_ping_during_grace_goes_down() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        engine.evaluate(check.id, t(70)).await.unwrap();

        let down = engine.ingest(check.id, PingInput::of_kind(PingKind::Fail), t(75)).await.unwrap();
        let flip = down.flip.unwrap();
        assert_eq!((flip.old_status, flip.new_status), (Status::Up, Status::Down));
        assert_eq!(flip.reason, FlipReason::Fail);
    }

    #[tokio::test]
    async fn fresh_ping_during_grace_keeps_up_without_flip() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        assert_eq!(engine.evaluate(check.id, t(70)).await.unwrap().check.status, Status::Grace);

        let up = engine.ingest(check.id, PingInput::default(), t(80)).await.unwrap();
        assert_eq!(up.check.status, Status::Up);
        assert!(up.flip.is_none());
    }

    #[tokio::test]
    async fn log_and_ignore_pings_only_count() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();

        let log = engine.ingest(check.id, PingInput::of_kind(PingKind::Log), t(5)).await.unwrap();
        assert_eq!(log.check.n_pings, 2);
        assert_eq!(log.check.last_ping, Some(t(0)));
        assert!(log.flip.is_none());
        assert_eq!(log.ping.kind, PingKind::Log);
    }

    #[tokio::test]
    async fn long_running_start_goes_down() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        engine.ingest(check.id, PingInput::of_kind(PingKind::Start), t(50)).await.unwrap();

        assert_eq!(engine.evaluate(check.id, t(100)).await.unwrap().check.status, Status::Up);
        let down = engine.evaluate(check.id, t(140)).await.unwrap();
        assert_eq!(down.flip.unwrap().reason, FlipReason::LongRunning);

        let done = engine.ingest(check.id, PingInput::default(), t(150)).await.unwrap();
        assert_eq!(done.check.status, Status::Up);
        assert_eq!(done.check.last_start, None);
    }

    #[tokio::test]
    async fn start_ping_does_not_revive_down_check() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        assert_eq!(engine.evaluate(check.id, t(91)).await.unwrap().check.status, Status::Down);

        let started = engine.ingest(check.id, PingInput::of_kind(PingKind::Start), t(100)).await.unwrap();
        assert_eq!(started.check.status, Status::Down);
        assert!(started.flip.is_none());
        assert!(engine.evaluate(check.id, t(150)).await.unwrap().flip.is_none());

        let done = engine.ingest(check.id, PingInput::default(), t(160)).await.unwrap();
        let flip = done.flip.unwrap();
        assert_eq!((flip.old_status, flip.new_status), (Status::Down, Status::Up));
        assert_eq!(flip.reason, FlipReason::Success);
    }

    #[tokio::test]
    async fn flips_are_strictly_increasing_at_same_instant() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        engine.ingest(check.id, PingInput::of_kind(PingKind::Fail), t(0)).await.unwrap();
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();

        let flips = flips(&engine, check.id).await;
        assert_eq!(flips.len(), 3);
        for pair in flips.windows(2) {
            assert!(pair[0].created < pair[1].created);
        }
        assert!(flips.iter().all(|f| f.old_status != f.new_status));
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();

        let paused = engine.pause(check.id, t(10)).await.unwrap();
        assert_eq!(paused.check.status, Status::Paused);
        assert_eq!(paused.flip.as_ref().unwrap().reason, FlipReason::Pause);

        // Paused checks never time out.
        assert!(engine.evaluate(check.id, t(10_000)).await.unwrap().flip.is_none());
        assert!(engine.pause(check.id, t(10_001)).await.unwrap().flip.is_none());

        let resumed = engine.resume(check.id, t(10_002)).await.unwrap();
        assert_eq!(resumed.check.status, Status::New);
        assert_eq!(resumed.check.last_ping, None);
        let flip = resumed.flip.unwrap();
        assert_eq!((flip.old_status, flip.new_status), (Status::Paused, Status::New));
        assert_eq!(flip.reason, FlipReason::Resume);
    }

    #[tokio::test]
    async fn ping_resumes_paused_check() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        engine.pause(check.id, t(0)).await.unwrap();

        let up = engine.ingest(check.id, PingInput::default(), t(5)).await.unwrap();
        assert_eq!(up.check.status, Status::Up);
        assert!(!up.check.paused);
        assert!(!up.flip.unwrap().should_alert());
    }

    #[tokio::test]
    async fn manual_resume_keeps_check_paused() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        let update = CheckUpdate { manual_resume: Some(true), ..CheckUpdate::default() };
        engine.configure(check.id, update, t(0)).await.unwrap();
        engine.pause(check.id, t(1)).await.unwrap();

        let ingested = engine.ingest(check.id, PingInput::default(), t(5)).await.unwrap();
        assert_eq!(ingested.ping.kind, PingKind::Ignore);
        assert_eq!(ingested.check.status, Status::Paused);
        assert_eq!(ingested.check.n_pings, 1);
        assert!(ingested.flip.is_none());
    }

    #[tokio::test]
    async fn keyword_filter_classifies_email() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        let filter = KeywordFilter {
            filter_subject: true,
            failure_kw: "FAILED".into(),
            success_kw: "OK".into(),
            ..KeywordFilter::default()
        };
        let update = CheckUpdate { filter: Some(filter), ..CheckUpdate::default() };
        engine.configure(check.id, update, t(0)).await.unwrap();

        let ingested = engine.ingest(check.id, PingInput::email("Backup failed", ""), t(1)).await.unwrap();
        assert_eq!(ingested.ping.kind, PingKind::Fail);
        assert_eq!(ingested.check.status, Status::Down);
    }

    #[tokio::test]
    async fn invalid_configuration_leaves_check_unmodified() {
        let engine = engine();
        let check = simple_check(&engine, 60, 30).await;
        let before = engine.get(check.id).await.unwrap();

        let update = CheckUpdate {
            kind: Some(CheckKind::Cron),
            schedule: Some("every other tuesday".into()),
            name: Some("renamed".into()),
            ..CheckUpdate::default()
        };
        let err = engine.configure(check.id, update, t(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(ConfigurationError::Schedule { .. })));

        let bad_tz = CheckUpdate { tz: Some("Atlantis/Central".into()), ..CheckUpdate::default() };
        assert!(engine.configure(check.id, bad_tz, t(1)).await.is_err());

        assert_eq!(engine.get(check.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn register_rejects_invalid_check() {
        let engine = engine();
        let check = Check::cron("nightly", "0 25 * * *", "UTC", Duration::from_secs(60), t(0));
        assert!(matches!(
            engine.register(check, t(0)).await,
            Err(EngineError::Configuration(_))
        ));
        assert!(engine.store().list_checks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shortening_timeout_can_flip_down() {
        let engine = engine();
        let check = simple_check(&engine, 3_600, 60).await;
        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();

        let update = CheckUpdate { timeout: Some(Duration::from_secs(60)), ..CheckUpdate::default() };
        let transition = engine.configure(check.id, update, t(500)).await.unwrap();
        assert_eq!(transition.check.status, Status::Down);
        assert_eq!(transition.flip.unwrap().reason, FlipReason::Timeout);
    }

    #[tokio::test]
    async fn unknown_check_is_not_found() {
        let engine = engine();
        let id = Uuid::new_v4();
        assert!(matches!(engine.evaluate(id, t(0)).await, Err(EngineError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn cron_scenario_stays_up_then_goes_down_after_grace() {
        let engine = engine();
        let check = Check::cron("minutely", "* * * * *", "UTC", Duration::from_secs(30), t(0));
        let check = engine.register(check, t(0)).await.unwrap();

        engine.ingest(check.id, PingInput::default(), t(0)).await.unwrap();
        engine.ingest(check.id, PingInput::default(), t(59)).await.unwrap();
        for secs in [0, 30, 59] {
            assert_eq!(engine.evaluate(check.id, t(secs)).await.unwrap().check.status, Status::Up);
        }
        for secs in [60, 75, 89] {
            let transition = engine.evaluate(check.id, t(secs)).await.unwrap();
            assert_ne!(transition.check.status, Status::Down, "down too early at t={secs}");
        }
        let down = engine.evaluate(check.id, t(120)).await.unwrap();
        assert_eq!(down.check.status, Status::Down);
        assert!(down.flip.is_some());
    }
}
