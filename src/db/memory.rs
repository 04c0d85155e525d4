//! In-process job store.
//!
//! Same conditional-update semantics as [`PgJobStore`](super::PgJobStore);
//! backs the test suite and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::store::{JobFilter, JobStore, StoreError};
use crate::models::job::{Job, JobId, JobKind, JobStatus, Transition};

struct Entry {
    job: Job,
    /// Insertion/requeue sequence, breaks `queued_at` ties in FIFO order.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        let seq = inner.bump();
        inner.jobs.insert(
            job.id,
            Entry {
                job: job.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).map(|e| e.job.clone()))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| filter.matches(&e.job))
            .collect();
        entries.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        let limit = filter
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn claim_next(
        &self,
        kinds: &[JobKind],
        at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Queued && kinds.contains(&e.job.kind))
            .min_by(|a, b| a.job.queued_at.cmp(&b.job.queued_at).then(a.seq.cmp(&b.seq)))
            .map(|e| e.job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(entry) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        entry
            .job
            .apply(&Transition::Claim { at })
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Some(entry.job.clone()))
    }

    async fn apply(
        &self,
        id: JobId,
        attempt: i32,
        transition: &Transition,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let requeue = matches!(transition, Transition::Requeue { .. });
        let seq = if requeue { Some(inner.bump()) } else { None };

        let Some(entry) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if entry.job.status != transition.from_status() || entry.job.attempt_count != attempt {
            return Ok(None);
        }
        entry.job.apply(transition).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            detail: e.to_string(),
        })?;
        if let Some(seq) = seq {
            entry.seq = seq;
        }
        Ok(Some(entry.job.clone()))
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.lock().await;
        let mut stalled: Vec<Job> = inner
            .jobs
            .values()
            .filter(|e| {
                e.job.status == JobStatus::Processing
                    && e.job.started_at.is_some_and(|s| s < started_before)
            })
            .map(|e| e.job.clone())
            .collect();
        stalled.sort_by_key(|j| j.started_at);
        Ok(stalled)
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|e| e.job.status.is_active())
            .count() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{FailureReason, JobInput};
    use std::collections::HashSet;
    use std::sync::Arc;

    const TEXT: &[JobKind] = &[JobKind::TextToImage];

    fn job(prompt: &str) -> Job {
        Job::new(JobKind::TextToImage, JobInput::prompt(prompt), "user-1")
    }

    #[tokio::test]
    async fn test_claims_in_fifo_order() {
        let store = MemoryJobStore::new();
        let jobs: Vec<Job> = (0..3).map(|i| job(&format!("prompt {i}"))).collect();
        for j in &jobs {
            store.insert(j).await.unwrap();
        }

        for expected in &jobs {
            let claimed = store.claim_next(TEXT, Utc::now()).await.unwrap().unwrap();
            assert_eq!(claimed.id, expected.id);
            assert_eq!(claimed.status, JobStatus::Processing);
        }
        assert!(store.claim_next(TEXT, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryJobStore::new();
        let j = job("a");
        store.insert(&j).await.unwrap();
        assert!(matches!(
            store.insert(&j).await,
            Err(StoreError::Duplicate(id)) if id == j.id
        ));
    }

    #[tokio::test]
    async fn test_stale_conditional_update_is_a_no_op() {
        let store = MemoryJobStore::new();
        let j = job("a");
        store.insert(&j).await.unwrap();
        let claimed = store.claim_next(TEXT, Utc::now()).await.unwrap().unwrap();

        let done = store
            .apply(claimed.id, 1, &Transition::complete("results/a.png", Utc::now()))
            .await
            .unwrap();
        assert!(done.is_some());

        let late = store
            .apply(
                claimed.id,
                1,
                &Transition::fail(FailureReason::Stalled, "stalled", Utc::now()),
            )
            .await
            .unwrap();
        assert!(late.is_none());

        let current = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Completed);
        assert_eq!(current.result_ref.as_deref(), Some("results/a.png"));
    }

    #[tokio::test]
    async fn test_update_from_an_earlier_attempt_is_ignored() {
        let store = MemoryJobStore::new();
        let j = job("a");
        store.insert(&j).await.unwrap();
        store.claim_next(TEXT, Utc::now()).await.unwrap();
        store
            .apply(j.id, 1, &Transition::fail(FailureReason::Stalled, "stalled", Utc::now()))
            .await
            .unwrap()
            .unwrap();
        store
            .apply(j.id, 1, &Transition::Requeue { at: Utc::now() })
            .await
            .unwrap()
            .unwrap();
        store.claim_next(TEXT, Utc::now()).await.unwrap().unwrap();

        // The first worker finally returns; its attempt is gone.
        let late = store
            .apply(j.id, 1, &Transition::complete("results/old.png", Utc::now()))
            .await
            .unwrap();
        assert!(late.is_none());

        let current = store.get(j.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Processing);
        assert_eq!(current.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_requeued_job_goes_to_the_back() {
        let store = MemoryJobStore::new();
        let first = job("first");
        let second = job("second");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        store.claim_next(TEXT, Utc::now()).await.unwrap();
        store
            .apply(first.id, 1, &Transition::fail(FailureReason::ProcessorError, "boom", Utc::now()))
            .await
            .unwrap();
        store
            .apply(first.id, 1, &Transition::Requeue { at: Utc::now() })
            .await
            .unwrap();

        let next = store.claim_next(TEXT, Utc::now()).await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
        let after = store.claim_next(TEXT, Utc::now()).await.unwrap().unwrap();
        assert_eq!(after.id, first.id);
        assert_eq!(after.created_at, first.created_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_share_a_job() {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..200 {
            store.insert(&job(&format!("p{i}"))).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(j) = store.claim_next(TEXT, Utc::now()).await.unwrap() {
                    claimed.push(j.id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(store.count_active().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_newest_first() {
        let store = MemoryJobStore::new();
        let a = job("a");
        let b = Job::new(JobKind::ImageTo3d, JobInput::source("uploads/b.png"), "user-1");
        let c = Job::new(JobKind::TextToImage, JobInput::prompt("c"), "user-2");
        for j in [&a, &b, &c] {
            store.insert(j).await.unwrap();
        }

        let mine = store.list(&JobFilter::owned_by("user-1")).await.unwrap();
        assert_eq!(
            mine.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );

        let texts = store
            .list(&JobFilter::owned_by("user-1").with_kind(Some(JobKind::TextToImage)))
            .await
            .unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].id, a.id);

        assert_eq!(store.list(&JobFilter::default()).await.unwrap().len(), 3);
    }
}
