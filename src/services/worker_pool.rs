//! Fixed-size pool of execution slots.
//!
//! Each slot loops on [`Dispatcher::dispatch`], runs the matching processor
//! under the soft time limit, and writes the terminal state back through a
//! conditional update. Processor errors, panics and timeouts all end as a
//! `failed` job; none of them escape the slot.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::db::{JobStore, StoreError};
use crate::models::job::{FailureReason, Job, JobStatus, Transition};
use crate::services::dispatcher::Dispatcher;
use crate::services::metrics::{MetricsEvent, MetricsSink};
use crate::services::processors::{ProcessorError, ProcessorRegistry, TaskProcessor, WorkItem};

/// How a claimed job ended for the slot that ran it.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Completed(Job),
    Failed(Job),
    /// Someone else (the stall monitor) resolved the job first; our write
    /// was dropped.
    Superseded,
}

pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn JobStore>,
    registry: Arc<ProcessorRegistry>,
    metrics: MetricsSink,
    capacity: usize,
    soft_time_limit: Duration,
    retry_backoff: Duration,
}

impl WorkerPool {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn JobStore>,
        registry: Arc<ProcessorRegistry>,
        metrics: MetricsSink,
        capacity: usize,
        soft_time_limit: Duration,
    ) -> Self {
        Self {
            dispatcher,
            store,
            registry,
            metrics,
            capacity: capacity.max(1),
            soft_time_limit,
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run every slot until `cancel` fires, then wait for in-flight jobs to
    /// finish. Returns once the pool is fully drained.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            capacity = self.capacity,
            soft_time_limit_secs = self.soft_time_limit.as_secs(),
            "Worker pool started"
        );

        let mut slots = JoinSet::new();
        for slot in 0..self.capacity {
            let pool = self.clone();
            let cancel = cancel.clone();
            slots.spawn(async move { pool.run_slot(slot, cancel).await });
        }

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker slot terminated abnormally");
            }
        }

        tracing::info!("Worker pool drained");
    }

    async fn run_slot(&self, slot: usize, cancel: CancellationToken) {
        tracing::debug!(slot, "Worker slot ready");
        loop {
            match self.dispatcher.dispatch(&cancel).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.execute(job).await {
                        tracing::error!(slot, error = %e, "Failed to record job outcome");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(slot, error = %e, "Failed to claim next job, will retry");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
        tracing::debug!(slot, "Worker slot stopped");
    }

    /// Run a job this slot has claimed and persist its terminal state.
    ///
    /// A store error here leaves the job `processing`; the stall monitor
    /// recovers it.
    pub async fn execute(&self, job: Job) -> Result<Execution, StoreError> {
        debug_assert_eq!(job.status, JobStatus::Processing);

        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempt_count,
            "Processing job"
        );

        let start = Instant::now();
        let outcome = match self.registry.get(job.kind) {
            Some(processor) => {
                run_with_limit(processor, WorkItem::from(&job), self.soft_time_limit).await
            }
            None => Err(ProcessorError::Unregistered(job.kind)),
        };
        let elapsed = start.elapsed();

        let transition = match &outcome {
            Ok(result_ref) => Transition::complete(result_ref.clone(), Utc::now()),
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    kind = %job.kind,
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job processing failed"
                );
                Transition::fail(e.reason(), e.to_string(), Utc::now())
            }
        };

        let Some(updated) = self
            .store
            .apply(job.id, job.attempt_count, &transition)
            .await?
        else {
            tracing::warn!(
                job_id = %job.id,
                attempt = job.attempt_count,
                "Job was resolved elsewhere before this worker finished, dropping result"
            );
            return Ok(Execution::Superseded);
        };

        match updated.status {
            JobStatus::Completed => {
                self.metrics.record(MetricsEvent::Completed {
                    kind: updated.kind,
                    duration: elapsed,
                });
                tracing::info!(
                    job_id = %updated.id,
                    result_ref = updated.result_ref.as_deref().unwrap_or_default(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
                Ok(Execution::Completed(updated))
            }
            _ => {
                self.metrics.record(MetricsEvent::Failed {
                    kind: updated.kind,
                    reason: updated
                        .failure_reason
                        .unwrap_or(FailureReason::ProcessorError),
                });
                Ok(Execution::Failed(updated))
            }
        }
    }
}

/// Run the processor in its own task so a panic is contained, and abandon
/// it once `limit` passes.
async fn run_with_limit(
    processor: Arc<dyn TaskProcessor>,
    item: WorkItem,
    limit: Duration,
) -> Result<String, ProcessorError> {
    let mut handle = tokio::spawn(async move { processor.process(&item).await });

    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ProcessorError::Panicked(join_error.to_string())),
        Err(_) => {
            handle.abort();
            Err(ProcessorError::Timeout(limit))
        }
    }
}
