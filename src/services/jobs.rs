//! Submission and query surface shared by the HTTP routes.
//!
//! Every read is authoritative: it goes straight to the [`JobStore`], and
//! access is checked through the configured [`AccessPolicy`].

use std::sync::Arc;

use crate::db::{JobFilter, JobStore};
use crate::error::JobError;
use crate::models::job::{FailureReason, Job, JobId, JobInput, JobKind, JobStatus};
use crate::services::access::{AccessPolicy, Principal};
use crate::services::dispatcher::Dispatcher;
use crate::services::retry::RetryController;

/// Upper bound on a single listing.
pub const LIST_LIMIT: i64 = 100;

/// What `get_result` can say about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultState {
    /// Storage key of the finished artifact.
    Ready(String),
    Pending(JobStatus),
    Failed {
        error: String,
        reason: Option<FailureReason>,
    },
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    retries: RetryController,
    policy: Arc<dyn AccessPolicy>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        retries: RetryController,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            retries,
            policy,
        }
    }

    pub async fn submit(
        &self,
        kind: JobKind,
        input: JobInput,
        principal: &Principal,
    ) -> Result<Job, JobError> {
        self.dispatcher.submit(kind, input, &principal.id).await
    }

    pub async fn get_status(&self, id: JobId, principal: &Principal) -> Result<Job, JobError> {
        self.load_authorized(id, principal).await
    }

    pub async fn get_result(
        &self,
        id: JobId,
        principal: &Principal,
    ) -> Result<ResultState, JobError> {
        let job = self.load_authorized(id, principal).await?;
        Ok(match (job.status, job.result_ref) {
            (JobStatus::Completed, Some(result_ref)) => ResultState::Ready(result_ref),
            (JobStatus::Failed, _) => ResultState::Failed {
                error: job.error.unwrap_or_else(|| "job failed".to_string()),
                reason: job.failure_reason,
            },
            (status, _) => ResultState::Pending(status),
        })
    }

    pub async fn retry(&self, id: JobId, principal: &Principal) -> Result<Job, JobError> {
        self.retries.retry(id, principal, self.policy.as_ref()).await
    }

    /// The caller's own jobs, newest first.
    pub async fn list(
        &self,
        principal: &Principal,
        kind: Option<JobKind>,
    ) -> Result<Vec<Job>, JobError> {
        let mut filter = JobFilter::owned_by(principal.id.clone()).with_kind(kind);
        filter.limit = Some(LIST_LIMIT);
        Ok(self.store.list(&filter).await?)
    }

    /// Every owner's jobs. Privileged callers only.
    pub async fn list_all(
        &self,
        principal: &Principal,
        kind: Option<JobKind>,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, JobError> {
        if !self.policy.is_privileged(principal) {
            return Err(JobError::Unauthorized(format!(
                "{} may not list other users' jobs",
                principal.id
            )));
        }
        let filter = JobFilter {
            kind,
            status,
            limit: Some(LIST_LIMIT),
            ..Default::default()
        };
        Ok(self.store.list(&filter).await?)
    }

    async fn load_authorized(&self, id: JobId, principal: &Principal) -> Result<Job, JobError> {
        let job = self.store.get(id).await?.ok_or(JobError::NotFound(id))?;
        if !self.policy.can_access(principal, &job) {
            return Err(JobError::Unauthorized(format!(
                "{} may not access job {id}",
                principal.id
            )));
        }
        Ok(job)
    }
}
