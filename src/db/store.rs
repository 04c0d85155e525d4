use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{Job, JobId, JobKind, JobStatus, Transition};

/// Listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

impl JobFilter {
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: Option<JobKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner.as_ref().map_or(true, |o| *o == job.owner)
            && self.kind.map_or(true, |k| k == job.kind)
            && self.status.map_or(true, |s| s == job.status)
    }
}

/// Durable job records: the single source of truth for job state.
///
/// Every status write goes through [`JobStore::claim_next`] or
/// [`JobStore::apply`], both of which are conditional on the prior state.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Matching jobs, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Atomically move the oldest queued job (by `queued_at`) whose kind is in
    /// `kinds` to processing. Concurrent callers never receive the same job;
    /// jobs of other kinds stay queued.
    async fn claim_next(
        &self,
        kinds: &[JobKind],
        at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Apply `transition` only if the job is still in the transition's source
    /// status at `attempt`. Returns `Ok(None)` when another writer got there
    /// first.
    async fn apply(
        &self,
        id: JobId,
        attempt: i32,
        transition: &Transition,
    ) -> Result<Option<Job>, StoreError>;

    /// Processing jobs that started before `started_before`.
    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    /// Queued plus processing.
    async fn count_active(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} already exists")]
    Duplicate(JobId),

    #[error("username `{0}` is already taken")]
    UsernameTaken(String),

    #[error("Corrupt job record {id}: {detail}")]
    Corrupt { id: String, detail: String },
}
