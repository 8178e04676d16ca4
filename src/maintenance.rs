//! Background credential maintenance
//!
//! Periodically sweeps long-expired, non-refreshable token records out of
//! storage. Ticks are jittered so multiple instances sharing a database do
//! not sweep in lockstep.

use chrono::Duration as ChronoDuration;
use metrics::histogram;
use rand::Rng;
use std::time::Duration as TokioDuration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::lifecycle::TokenLifecycleManager;

/// Runs the retention sweep until shutdown.
pub struct MaintenanceService {
    lifecycle: TokenLifecycleManager,
    interval_seconds: u64,
    retention: ChronoDuration,
    jitter_pct: f64,
}

impl MaintenanceService {
    pub fn new(
        lifecycle: TokenLifecycleManager,
        interval_seconds: u64,
        retention_days: u64,
        jitter_pct: f64,
    ) -> Self {
        Self {
            lifecycle,
            interval_seconds: interval_seconds.max(1),
            retention: ChronoDuration::days(retention_days as i64),
            jitter_pct,
        }
    }

    /// Run the cleanup loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.interval_seconds,
            retention_days = self.retention.num_days(),
            "Starting credential maintenance service"
        );

        loop {
            let jitter = sample_jitter_seconds(self.interval_seconds, self.jitter_pct);
            let tick_interval = TokioDuration::from_secs(self.interval_seconds + jitter);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Credential maintenance shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    match self.lifecycle.cleanup_expired(self.retention).await {
                        Ok(deleted) => debug!(deleted, "maintenance tick finished"),
                        Err(err) => error!(error = ?err, "Credential cleanup tick failed"),
                    }
                    histogram!("token_cleanup_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Credential maintenance service stopped");
    }
}

fn sample_jitter_seconds(base_interval_seconds: u64, jitter_pct: f64) -> u64 {
    let mut rng = rand::thread_rng();
    compute_jitter_seconds(base_interval_seconds, jitter_pct, &mut rng)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(
    base_interval_seconds: u64,
    jitter_pct: f64,
    rng: &mut R,
) -> u64 {
    if jitter_pct <= 0.0 {
        return 0;
    }
    let cap = (base_interval_seconds as f64 * jitter_pct).floor() as u64;
    if cap == 0 {
        return 0;
    }
    rng.gen_range(0..=cap)
}
