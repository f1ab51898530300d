//! Liveness heartbeat to the parent process.
//!
//! Started once the worker reaches `Running`. The first `IMOK` goes out one
//! full period after `READY`, never before it.

use crate::observability::metrics;
use crate::upstream::{ParentChannel, UpstreamMessage};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Period between two `IMOK` messages.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Spawn the heartbeat task.
///
/// The task runs until it is aborted or the parent channel closes.
pub fn spawn_heartbeat(upstream: ParentChannel, period: Duration) -> JoinHandle<()> {
    tokio::spawn(run_heartbeat(upstream, period))
}

async fn run_heartbeat(upstream: ParentChannel, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        target: "worker.heartbeat",
        interval_ms = period.as_millis(),
        "Heartbeat started"
    );

    loop {
        ticker.tick().await;
        if !upstream.send(UpstreamMessage::ImOk) {
            debug!(target: "worker.heartbeat", "Parent channel closed, stopping heartbeat");
            break;
        }
        metrics::record_heartbeat();
    }
}
