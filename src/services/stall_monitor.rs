//! Recovery for jobs orphaned in `processing`.
//!
//! A worker that crashes or hangs never writes a terminal state. The monitor
//! periodically force-fails such jobs with reason `stalled` so they become
//! retryable. Every write is conditional on the job still being `processing`
//! at the attempt that was scanned, so a worker that finishes first wins.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::{JobStore, StoreError};
use crate::models::job::{FailureReason, Transition};
use crate::services::metrics::{MetricsEvent, MetricsSink};

pub struct StallMonitor {
    store: Arc<dyn JobStore>,
    metrics: MetricsSink,
    threshold: Duration,
    interval: Duration,
}

impl StallMonitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        metrics: MetricsSink,
        threshold: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            threshold,
            interval,
        }
    }

    /// Run scans on a fixed interval until `cancel` fires.
    ///
    /// The first scan happens immediately, so jobs orphaned by a previous
    /// worker process are recovered at start-up.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            threshold_secs = self.threshold.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Stall monitor started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stall monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.scan_once(Utc::now()).await {
                        Ok(0) => tracing::debug!("Stall scan: nothing to recover"),
                        Ok(recovered) => tracing::warn!(recovered, "Stall scan: failed stalled jobs"),
                        Err(e) => tracing::error!(error = %e, "Stall scan failed"),
                    }
                }
            }
        }
    }

    /// One pass: fail every job that has been `processing` for longer than
    /// the threshold as of `now`. Returns how many this pass recovered.
    ///
    /// A write error on one job is logged and the pass moves on; that job is
    /// picked up again next scan.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let Some(cutoff) = chrono::Duration::from_std(self.threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            return Ok(0);
        };

        let message = format!(
            "no progress for over {}s; worker presumed lost",
            self.threshold.as_secs()
        );

        let mut recovered = 0;
        for job in self.store.find_stalled(cutoff).await? {
            let transition = Transition::fail(FailureReason::Stalled, message.clone(), now);
            let written = match self.store.apply(job.id, job.attempt_count, &transition).await {
                Ok(written) => written,
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark stalled job");
                    continue;
                }
            };
            match written {
                Some(failed) => {
                    recovered += 1;
                    tracing::warn!(
                        job_id = %failed.id,
                        kind = %failed.kind,
                        attempt = failed.attempt_count,
                        started_at = ?job.started_at,
                        "Marked stalled job as failed"
                    );
                    self.metrics.record(MetricsEvent::Failed {
                        kind: failed.kind,
                        reason: FailureReason::Stalled,
                    });
                }
                None => {
                    tracing::debug!(job_id = %job.id, "Stalled job resolved before recovery");
                }
            }
        }

        self.metrics
            .record(MetricsEvent::QueueDepth(self.store.count_active().await?));

        Ok(recovered)
    }
}
