//! Queue metrics.
//!
//! Dispatcher, worker pool, retry controller and stall monitor never touch
//! the metrics registry directly. They send [`MetricsEvent`]s through a
//! cloneable [`MetricsSink`]; a single [`MetricsRecorder`] task owns the
//! queue-depth count and forwards everything to the `metrics` facade.
//!
//! A process only sees its own events: the API never observes completions
//! and a worker never observes submissions. [`QueueDepthSync`] corrects the
//! count from the job store on a fixed interval in every process.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::{JobStore, StoreError};
use crate::models::job::{FailureReason, JobKind};

pub const JOBS_SUBMITTED: &str = "generation_jobs_submitted_total";
pub const JOBS_COMPLETED: &str = "generation_jobs_completed_total";
pub const JOBS_FAILED: &str = "generation_jobs_failed_total";
pub const JOBS_REQUEUED: &str = "generation_jobs_requeued_total";
pub const QUEUE_DEPTH: &str = "generation_queue_depth";
pub const PROCESSING_SECONDS: &str = "generation_processing_seconds";

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(JOBS_SUBMITTED, "Total generation jobs submitted");
    metrics::describe_counter!(JOBS_COMPLETED, "Total generation jobs completed");
    metrics::describe_counter!(JOBS_FAILED, "Total generation jobs that failed");
    metrics::describe_counter!(JOBS_REQUEUED, "Total failed jobs put back on the queue");
    metrics::describe_gauge!(
        QUEUE_DEPTH,
        "Current number of queued plus processing jobs"
    );
    metrics::describe_histogram!(
        PROCESSING_SECONDS,
        metrics::Unit::Seconds,
        "Time to process a completed generation job"
    );
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    Submitted { kind: JobKind },
    Requeued { kind: JobKind },
    Completed { kind: JobKind, duration: Duration },
    Failed { kind: JobKind, reason: FailureReason },
    /// Authoritative queued + processing count read back from the store.
    QueueDepth(u64),
}

/// Sending half, handed to every component that reports events.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    tx: Option<mpsc::UnboundedSender<MetricsEvent>>,
}

impl MetricsSink {
    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, event: MetricsEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("Metrics recorder has shut down, dropping event");
            }
        }
    }
}

pub struct MetricsRecorder {
    rx: mpsc::UnboundedReceiver<MetricsEvent>,
    depth: u64,
}

impl MetricsRecorder {
    pub fn channel() -> (MetricsSink, MetricsRecorder) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MetricsSink { tx: Some(tx) },
            MetricsRecorder { rx, depth: 0 },
        )
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Consume events until every sink has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.handle(event);
        }
        tracing::debug!("Metrics recorder stopped");
    }

    /// Apply every event currently buffered without waiting.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: MetricsEvent) {
        match event {
            MetricsEvent::Submitted { kind } => {
                metrics::counter!(JOBS_SUBMITTED, "kind" => kind.to_string()).increment(1);
                self.depth += 1;
            }
            MetricsEvent::Requeued { kind } => {
                metrics::counter!(JOBS_REQUEUED, "kind" => kind.to_string()).increment(1);
                self.depth += 1;
            }
            MetricsEvent::Completed { kind, duration } => {
                metrics::counter!(JOBS_COMPLETED, "kind" => kind.to_string()).increment(1);
                metrics::histogram!(PROCESSING_SECONDS, "kind" => kind.to_string())
                    .record(duration.as_secs_f64());
                self.depth = self.depth.saturating_sub(1);
            }
            MetricsEvent::Failed { kind, reason } => {
                metrics::counter!(
                    JOBS_FAILED,
                    "kind" => kind.to_string(),
                    "reason" => reason.as_str()
                )
                .increment(1);
                self.depth = self.depth.saturating_sub(1);
            }
            MetricsEvent::QueueDepth(depth) => {
                self.depth = depth;
            }
        }
        metrics::gauge!(QUEUE_DEPTH).set(self.depth as f64);
    }
}

/// Periodic re-sync of the queue depth gauge from `count_active`.
pub struct QueueDepthSync {
    store: Arc<dyn JobStore>,
    metrics: MetricsSink,
    interval: Duration,
}

impl QueueDepthSync {
    pub fn new(store: Arc<dyn JobStore>, metrics: MetricsSink, interval: Duration) -> Self {
        Self {
            store,
            metrics,
            interval,
        }
    }

    pub async fn sync_once(&self) -> Result<u64, StoreError> {
        let depth = self.store.count_active().await?;
        self.metrics.record(MetricsEvent::QueueDepth(depth));
        Ok(depth)
    }

    /// Sync immediately, then every interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sync_once().await {
                        tracing::warn!(error = %e, "Failed to read queue depth");
                    }
                }
            }
        }
        tracing::debug!("Queue depth sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use crate::models::job::{Job, JobInput};

    #[test]
    fn test_depth_follows_lifecycle_events() {
        let (sink, mut recorder) = MetricsRecorder::channel();
        let kind = JobKind::TextToImage;

        sink.record(MetricsEvent::Submitted { kind });
        sink.record(MetricsEvent::Submitted { kind });
        recorder.drain();
        assert_eq!(recorder.depth(), 2);

        sink.record(MetricsEvent::Completed {
            kind,
            duration: Duration::from_secs(3),
        });
        sink.record(MetricsEvent::Failed {
            kind,
            reason: FailureReason::Stalled,
        });
        recorder.drain();
        assert_eq!(recorder.depth(), 0);

        sink.record(MetricsEvent::Failed {
            kind,
            reason: FailureReason::Timeout,
        });
        recorder.drain();
        assert_eq!(recorder.depth(), 0);

        sink.record(MetricsEvent::QueueDepth(7));
        sink.record(MetricsEvent::Requeued { kind });
        recorder.drain();
        assert_eq!(recorder.depth(), 8);
    }

    #[tokio::test]
    async fn test_run_exits_when_sinks_dropped() {
        let (sink, recorder) = MetricsRecorder::channel();
        let handle = tokio::spawn(recorder.run());
        sink.record(MetricsEvent::QueueDepth(1));
        drop(sink);
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        MetricsSink::disabled().record(MetricsEvent::QueueDepth(1));
    }

    #[tokio::test]
    async fn test_sync_replaces_a_drifted_count() {
        let store = Arc::new(MemoryJobStore::new());
        for prompt in ["a", "b"] {
            store
                .insert(&Job::new(JobKind::TextToImage, JobInput::prompt(prompt), "alice"))
                .await
                .unwrap();
        }
        let (sink, mut recorder) = MetricsRecorder::channel();
        for _ in 0..5 {
            sink.record(MetricsEvent::Submitted {
                kind: JobKind::TextToImage,
            });
        }
        recorder.drain();
        assert_eq!(recorder.depth(), 5);

        let sync = QueueDepthSync::new(store, sink, Duration::from_secs(15));
        assert_eq!(sync.sync_once().await.unwrap(), 2);
        recorder.drain();
        assert_eq!(recorder.depth(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_runs_on_interval_until_cancelled() {
        let store = Arc::new(MemoryJobStore::new());
        let (sink, mut recorder) = MetricsRecorder::channel();
        sink.record(MetricsEvent::QueueDepth(9));
        recorder.drain();

        let sync = Arc::new(QueueDepthSync::new(
            store.clone(),
            sink,
            Duration::from_secs(15),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let sync = sync.clone();
            let cancel = cancel.clone();
            async move { sync.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        recorder.drain();
        assert_eq!(recorder.depth(), 0);

        store
            .insert(&Job::new(JobKind::TextToImage, JobInput::prompt("a"), "alice"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        recorder.drain();
        assert_eq!(recorder.depth(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
