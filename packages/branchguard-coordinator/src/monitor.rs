//! Periodic background work: lock sweeps and the shadow monitor.
//!
//! Each task is an interval ticker racing a [`CancellationToken`]. The sweep
//! bodies live on the managers and are called directly by tests.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lock_manager::LockManager;
use crate::shadow::ShadowIndexManager;

/// TTL sweep followed by heartbeat sweep, every `every`.
pub fn spawn_lock_sweeper(
    locks: Arc<LockManager>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "Lock sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match locks.run_sweeps().await {
                        Ok(report) if report.total() > 0 => info!(
                            expired = report.expired,
                            heartbeat_expired = report.heartbeat_expired,
                            "Lock sweep reaped locks"
                        ),
                        Ok(_) => debug!("Lock sweep: nothing to reap"),
                        Err(e) => warn!("Lock sweep failed, retrying next tick: {}", e),
                    }
                }
            }
        }
        info!("Lock sweeper stopped");
    })
}

/// Shadow retention and staleness sweep, every `every`.
pub fn spawn_shadow_monitor(
    shadows: Arc<ShadowIndexManager>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "Shadow monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = shadows.monitor_sweep().await {
                        warn!("Shadow monitor pass failed, retrying next tick: {}", e);
                    }
                }
            }
        }
        info!("Shadow monitor stopped");
    })
}
