//! Background deadline sweep.
//!
//! Runs [`Monitor::sweep`] on a fixed interval until the shutdown future
//! resolves. A failed pass is logged and the loop keeps going.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::pipeline::Monitor;

pub async fn run(monitor: Arc<Monitor>, interval: Duration, shutdown: impl Future<Output = ()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(interval_secs = interval.as_secs(), "Deadline sweeper started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Err(e) = monitor.sweep(Utc::now()).await {
                    error!(error = %e, "Sweep failed");
                }
            }
        }
    }

    info!("Deadline sweeper stopped");
}
