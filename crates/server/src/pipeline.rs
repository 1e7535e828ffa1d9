//! The monitor pipeline: status engine in front, alert dispatcher behind.
//!
//! Every operation that can flip a check hands the flip straight to the
//! dispatcher. A dispatch that fails is logged and left for the recovery
//! sweep; the status change itself is already durable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use deadman_core::config::SweepConfig;
use deadman_core::{Check, Flip, PingInput};
use deadman_monitor::{CheckUpdate, EngineError, Ingested, StatusEngine, Transition};
use deadman_notify::{AlertDispatcher, DispatchError, DispatchResult};
use deadman_store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub flipped: usize,
    pub errors: usize,
    pub recovered: usize,
}

pub struct Monitor {
    engine: Arc<StatusEngine>,
    dispatcher: Arc<AlertDispatcher>,
    concurrency: usize,
    recovery_grace: Duration,
}

impl Monitor {
    pub fn new(engine: Arc<StatusEngine>, dispatcher: Arc<AlertDispatcher>, sweep: &SweepConfig) -> Self {
        Self {
            engine,
            dispatcher,
            concurrency: sweep.concurrency.max(1),
            recovery_grace: Duration::from_secs(sweep.recovery_grace_secs),
        }
    }

    pub fn engine(&self) -> &StatusEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.engine.store()
    }

    pub async fn register(&self, check: Check, now: DateTime<Utc>) -> Result<Check, MonitorError> {
        Ok(self.engine.register(check, now).await?)
    }

    /// Ingest a ping for a check and dispatch the flip it caused, if any.
    pub async fn ingest_ping(
        &self,
        check_id: Uuid,
        input: PingInput,
        now: DateTime<Utc>,
    ) -> Result<Ingested, MonitorError> {
        let ingested = self.engine.ingest(check_id, input, now).await?;
        self.dispatch(ingested.flip.as_ref(), now).await;
        Ok(ingested)
    }

    /// Re-evaluate one check against the clock.
    pub async fn evaluate(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Transition, MonitorError> {
        let transition = self.engine.evaluate(check_id, now).await?;
        self.dispatch(transition.flip.as_ref(), now).await;
        Ok(transition)
    }

    pub async fn pause(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Transition, MonitorError> {
        let transition = self.engine.pause(check_id, now).await?;
        self.dispatch(transition.flip.as_ref(), now).await;
        Ok(transition)
    }

    pub async fn resume(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<Transition, MonitorError> {
        let transition = self.engine.resume(check_id, now).await?;
        self.dispatch(transition.flip.as_ref(), now).await;
        Ok(transition)
    }

    pub async fn configure(
        &self,
        check_id: Uuid,
        update: CheckUpdate,
        now: DateTime<Utc>,
    ) -> Result<Transition, MonitorError> {
        let transition = self.engine.configure(check_id, update, now).await?;
        self.dispatch(transition.flip.as_ref(), now).await;
        Ok(transition)
    }

    /// Re-send the current alert for a check. Returns channels attempted.
    pub async fn resend(&self, check_id: Uuid, now: DateTime<Utc>) -> Result<usize, MonitorError> {
        Ok(self.dispatcher.resend(check_id, now).await?)
    }

    /// Evaluate every check, then re-dispatch stale unprocessed flips.
    ///
    /// Checks are evaluated concurrently up to the configured limit. A check
    /// that fails to evaluate is counted and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, MonitorError> {
        let checks = self.store().list_checks().await?;
        let mut report = SweepReport {
            evaluated: checks.len(),
            ..SweepReport::default()
        };

        let mut results = stream::iter(checks.into_iter().map(|c| c.id))
            .map(|id| async move { (id, self.evaluate(id, now).await) })
            .buffer_unordered(self.concurrency);

        while let Some((check_id, result)) = results.next().await {
            match result {
                Ok(Transition { flip: Some(_), .. }) => report.flipped += 1,
                Ok(_) => {}
                Err(MonitorError::Engine(EngineError::NotFound(_))) => {
                    debug!(check_id = %check_id, "Check removed during sweep");
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(check_id = %check_id, error = %e, "Check evaluation failed");
                }
            }
        }

        report.recovered = self.recover(now).await?.len();

        if report.flipped > 0 || report.errors > 0 || report.recovered > 0 {
            info!(
                evaluated = report.evaluated,
                flipped = report.flipped,
                errors = report.errors,
                recovered = report.recovered,
                "Sweep complete"
            );
        }
        Ok(report)
    }

    pub async fn recover(&self, now: DateTime<Utc>) -> Result<Vec<DispatchResult>, MonitorError> {
        Ok(self.dispatcher.recover(now, self.recovery_grace).await?)
    }

    async fn dispatch(&self, flip: Option<&Flip>, now: DateTime<Utc>) {
        let Some(flip) = flip else { return };
        match self.dispatcher.process(flip, now).await {
            Ok(_) => {}
            Err(DispatchError::Busy(id)) => debug!(flip_id = %id, "Flip already being dispatched"),
            Err(e) => warn!(
                flip_id = %flip.id,
                check_id = %flip.check_id,
                error = %e,
                "Dispatch failed, leaving flip for recovery"
            ),
        }
    }
}
