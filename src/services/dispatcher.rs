//! Job submission and hand-out.
//!
//! `submit` persists a queued job and announces it; `dispatch` hands the
//! oldest queued job to exactly one caller through the store's atomic claim,
//! suspending while the queue is empty.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::db::{JobStore, StoreError};
use crate::error::JobError;
use crate::models::job::{Job, JobInput, JobKind};
use crate::services::metrics::{MetricsEvent, MetricsSink};
use crate::services::queue::QueueSignal;

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    /// Kinds this process has processors for, in claim-filter form.
    accepted: Vec<JobKind>,
    wake: Arc<Notify>,
    signal: Option<Arc<QueueSignal>>,
    metrics: MetricsSink,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        accepted: impl IntoIterator<Item = JobKind>,
        metrics: MetricsSink,
        poll_interval: Duration,
    ) -> Self {
        let mut kinds: Vec<JobKind> = Vec::new();
        for kind in accepted {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Self {
            store,
            accepted: kinds,
            wake: Arc::new(Notify::new()),
            signal: None,
            metrics,
            poll_interval,
        }
    }

    /// Also announce new work to other processes.
    pub fn with_signal(mut self, signal: Arc<QueueSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Local wake-up handle, fed by the Redis subscription in worker processes.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn accepts(&self, kind: JobKind) -> bool {
        self.accepted.contains(&kind)
    }

    /// Validate, persist as `queued`, and announce. Never waits on processing.
    pub async fn submit(
        &self,
        kind: JobKind,
        input: JobInput,
        owner: &str,
    ) -> Result<Job, JobError> {
        if !self.accepts(kind) {
            return Err(JobError::Validation(format!(
                "no processor is registered for {kind}"
            )));
        }
        input.validate_for(kind)?;
        if owner.trim().is_empty() {
            return Err(JobError::Validation("owner must not be empty".to_string()));
        }

        let job = Job::new(kind, input, owner);
        self.store.insert(&job).await?;
        self.metrics.record(MetricsEvent::Submitted { kind });

        tracing::info!(job_id = %job.id, kind = %kind, owner = %owner, "Job submitted");

        self.announce(&job).await;
        Ok(job)
    }

    /// Wake a local slot and, when configured, slots in other processes.
    /// Publishing is best-effort; idle slots poll anyway.
    pub async fn announce(&self, job: &Job) {
        self.wake.notify_one();
        if let Some(signal) = &self.signal {
            if let Err(e) = signal.publish(job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to publish queue announcement");
            }
        }
    }

    /// Claim the next queued job of an accepted kind, waiting until one
    /// arrives. Jobs of other kinds are left for processes that run them.
    ///
    /// Returns `Ok(None)` once `cancel` fires.
    pub async fn dispatch(&self, cancel: &CancellationToken) -> Result<Option<Job>, StoreError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            // Register interest before looking, so an announcement that lands
            // between the claim attempt and the wait is not lost.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.store.claim_next(&self.accepted, Utc::now()).await? {
                // More work may be waiting; let another idle slot look.
                self.wake.notify_one();
                return Ok(Some(job));
            }

            tracing::trace!("Queue empty, waiting for work");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use crate::models::job::JobStatus;
    use tokio_test::{assert_pending, assert_ready};

    fn dispatcher(store: Arc<MemoryJobStore>) -> Dispatcher {
        Dispatcher::new(
            store,
            [JobKind::TextToImage],
            MetricsSink::disabled(),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_unregistered_kind_creates_no_record() {
        let store = Arc::new(MemoryJobStore::new());
        let dispatcher = dispatcher(store.clone());

        let err = dispatcher
            .submit(JobKind::ImageTo3d, JobInput::source("uploads/a"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(store.list(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_creates_no_record() {
        let store = Arc::new(MemoryJobStore::new());
        let dispatcher = dispatcher(store.clone());

        let err = dispatcher
            .submit(JobKind::TextToImage, JobInput::default(), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(store.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_persists_queued_job() {
        let store = Arc::new(MemoryJobStore::new());
        let dispatcher = dispatcher(store.clone());

        let job = dispatcher
            .submit(JobKind::TextToImage, JobInput::prompt("a red cube"), "alice")
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.owner, "alice");
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_submission() {
        let store = Arc::new(MemoryJobStore::new());
        let dispatcher = dispatcher(store.clone());
        let cancel = CancellationToken::new();

        let mut waiting = tokio_test::task::spawn(dispatcher.dispatch(&cancel));
        assert_pending!(waiting.poll());

        let job = dispatcher
            .submit(JobKind::TextToImage, JobInput::prompt("a red cube"), "alice")
            .await
            .unwrap();
        assert!(waiting.is_woken());

        let claimed = assert_ready!(waiting.poll()).unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_dispatch_returns_none_when_cancelled() {
        let store = Arc::new(MemoryJobStore::new());
        let dispatcher = dispatcher(store);
        let cancel = CancellationToken::new();

        let mut waiting = tokio_test::task::spawn(dispatcher.dispatch(&cancel));
        assert_pending!(waiting.poll());

        cancel.cancel();
        assert!(waiting.is_woken());
        assert!(assert_ready!(waiting.poll()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_skips_kinds_it_cannot_run() {
        let store = Arc::new(MemoryJobStore::new());
        let api = Dispatcher::new(
            store.clone(),
            [JobKind::ImageTo3d, JobKind::TextToImage],
            MetricsSink::disabled(),
            Duration::from_secs(3600),
        );
        let mesh = api
            .submit(JobKind::ImageTo3d, JobInput::source("uploads/a"), "alice")
            .await
            .unwrap();
        let cube = api
            .submit(JobKind::TextToImage, JobInput::prompt("a red cube"), "alice")
            .await
            .unwrap();

        let worker = dispatcher(store.clone());
        let cancel = CancellationToken::new();
        let claimed = worker.dispatch(&cancel).await.unwrap().unwrap();
        assert_eq!(claimed.id, cube.id);

        let mut waiting = tokio_test::task::spawn(worker.dispatch(&cancel));
        assert_pending!(waiting.poll());
        let untouched = store.get(mesh.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Queued);
        assert_eq!(untouched.attempt_count, 1);
    }
}
