//! crates/ride_platform_core/src/workers/mod.rs
//!
//! Background loops. Each one ticks on an interval, processes a bounded batch
//! per tick and checks the shutdown token between items.

pub mod ocr;
pub mod renewal;

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use ocr::{OcrPassSummary, OcrWorker, OcrWorkerConfig, OcrWorkerPorts};
pub use renewal::{RenewalConfig, RenewalSummary, RenewalWorker};

/// Calls `tick` every `period` until `shutdown` is cancelled. A tick that is
/// running when shutdown arrives is allowed to finish its current item.
pub async fn run_every<F, Fut>(name: &'static str, period: Duration, shutdown: CancellationToken, mut tick: F)
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(worker = name, period_secs = period.as_secs(), "Worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => tick(shutdown.clone()).await,
        }
    }

    info!(worker = name, "Worker stopped");
}
