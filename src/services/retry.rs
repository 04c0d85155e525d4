use chrono::Utc;
use std::sync::Arc;

use crate::db::JobStore;
use crate::error::JobError;
use crate::models::job::{Job, JobId, JobStatus, Transition};
use crate::services::access::{AccessPolicy, Principal};
use crate::services::dispatcher::Dispatcher;
use crate::services::metrics::{MetricsEvent, MetricsSink};

/// Puts failed jobs back on the queue with their original input, up to
/// `max_attempts` dispatches in total.
pub struct RetryController {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    metrics: MetricsSink,
    max_attempts: i32,
}

impl RetryController {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        metrics: MetricsSink,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
            max_attempts,
        }
    }

    pub async fn retry(
        &self,
        id: JobId,
        principal: &Principal,
        policy: &dyn AccessPolicy,
    ) -> Result<Job, JobError> {
        let job = self.store.get(id).await?.ok_or(JobError::NotFound(id))?;

        if !policy.can_access(principal, &job) {
            return Err(JobError::Unauthorized(format!(
                "{} may not retry job {id}",
                principal.id
            )));
        }
        if job.status != JobStatus::Failed {
            return Err(JobError::InvalidState {
                id,
                status: job.status,
                expected: JobStatus::Failed,
            });
        }
        if job.attempt_count >= self.max_attempts {
            return Err(JobError::RetryExhausted {
                id,
                attempts: job.attempt_count,
                max_attempts: self.max_attempts,
            });
        }

        let requeue = Transition::Requeue { at: Utc::now() };
        let Some(requeued) = self.store.apply(id, job.attempt_count, &requeue).await? else {
            // A concurrent retry got there first.
            let status = self
                .store
                .get(id)
                .await?
                .map_or(job.status, |current| current.status);
            return Err(JobError::InvalidState {
                id,
                status,
                expected: JobStatus::Failed,
            });
        };

        self.metrics.record(MetricsEvent::Requeued {
            kind: requeued.kind,
        });
        tracing::info!(
            job_id = %id,
            attempt = requeued.attempt_count,
            max_attempts = self.max_attempts,
            requested_by = %principal.id,
            "Job requeued for retry"
        );

        self.dispatcher.announce(&requeued).await;
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use crate::models::job::{FailureReason, JobInput, JobKind};
    use crate::services::access::OwnerOrAdmin;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        retry: RetryController,
    }

    fn fixture(max_attempts: i32) -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            [JobKind::TextToImage],
            MetricsSink::disabled(),
            Duration::from_secs(1),
        ));
        let retry = RetryController::new(
            store.clone(),
            dispatcher,
            MetricsSink::disabled(),
            max_attempts,
        );
        Fixture { store, retry }
    }

    async fn failed_job(store: &MemoryJobStore) -> Job {
        let job = Job::new(JobKind::TextToImage, JobInput::prompt("a red cube"), "alice");
        store.insert(&job).await.unwrap();
        let claimed = store.claim_next(&[JobKind::TextToImage], Utc::now()).await.unwrap().unwrap();
        store
            .apply(
                claimed.id,
                claimed.attempt_count,
                &Transition::fail(FailureReason::ProcessorError, "boom", Utc::now()),
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_retry_requeues_with_original_input() {
        let f = fixture(3);
        let failed = failed_job(&f.store).await;

        let requeued = f
            .retry
            .retry(failed.id, &Principal::user("alice"), &OwnerOrAdmin)
            .await
            .unwrap();

        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.attempt_count, 2);
        assert_eq!(requeued.input, failed.input);
        assert_eq!(requeued.created_at, failed.created_at);
        assert!(requeued.completed_at.is_none());
        assert!(requeued.result_ref.is_none());
        assert!(requeued.error.is_none());
    }

    #[tokio::test]
    async fn test_retry_requires_owner_or_admin() {
        let f = fixture(3);
        let failed = failed_job(&f.store).await;

        let err = f
            .retry
            .retry(failed.id, &Principal::user("mallory"), &OwnerOrAdmin)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Unauthorized(_)));

        let requeued = f
            .retry
            .retry(failed.id, &Principal::admin("ops"), &OwnerOrAdmin)
            .await
            .unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_retry_of_queued_job_is_invalid_state() {
        let f = fixture(3);
        let failed = failed_job(&f.store).await;
        let alice = Principal::user("alice");

        f.retry.retry(failed.id, &alice, &OwnerOrAdmin).await.unwrap();
        let err = f.retry.retry(failed.id, &alice, &OwnerOrAdmin).await.unwrap_err();

        assert!(matches!(
            err,
            JobError::InvalidState {
                status: JobStatus::Queued,
                ..
            }
        ));
        assert_eq!(f.store.get(failed.id).await.unwrap().unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_retry_at_cap_is_exhausted() {
        let f = fixture(1);
        let failed = failed_job(&f.store).await;

        let err = f
            .retry
            .retry(failed.id, &Principal::user("alice"), &OwnerOrAdmin)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::RetryExhausted {
                attempts: 1,
                max_attempts: 1,
                ..
            }
        ));
        assert_eq!(f.store.get(failed.id).await.unwrap().unwrap(), failed);
    }

    #[tokio::test]
    async fn test_retry_unknown_job() {
        let f = fixture(3);
        let id = uuid::Uuid::new_v4();
        let err = f
            .retry
            .retry(id, &Principal::admin("ops"), &OwnerOrAdmin)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(missing) if missing == id));
    }
}
