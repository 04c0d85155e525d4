use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::store::{JobFilter, JobStore, StoreError};
use crate::models::job::{FailureReason, Job, JobId, JobInput, JobKind, JobStatus, Transition};

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, kind, input, status, owner, created_at, queued_at, started_at, \
    completed_at, result_ref, error, failure_reason, attempt_count";

/// PostgreSQL-backed job store.
///
/// Claims use `FOR UPDATE SKIP LOCKED` and every transition is a single
/// `UPDATE .. WHERE status = .. AND attempt_count = ..`, so any number of
/// worker processes can share one table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(row: &PgRow, detail: impl ToString) -> StoreError {
    let id: Option<JobId> = row.try_get("id").ok();
    StoreError::Corrupt {
        id: id.map(|i| i.to_string()).unwrap_or_default(),
        detail: detail.to_string(),
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let failure_reason: Option<String> = row.try_get("failure_reason")?;
    let input: Json<JobInput> = row.try_get("input")?;

    Ok(Job {
        id: row.try_get("id")?,
        kind: kind.parse().map_err(|e| corrupt(row, e))?,
        input: input.0,
        status: status.parse().map_err(|e| corrupt(row, e))?,
        owner: row.try_get("owner")?,
        created_at: row.try_get("created_at")?,
        queued_at: row.try_get("queued_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        result_ref: row.try_get("result_ref")?,
        error: row.try_get("error")?,
        failure_reason: failure_reason
            .map(|r| r.parse::<FailureReason>())
            .transpose()
            .map_err(|e| corrupt(row, e))?,
        attempt_count: row.try_get("attempt_count")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, kind, input, status, owner, created_at, queued_at, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.kind.to_string())
        .bind(Json(&job.input))
        .bind(job.status.as_str())
        .bind(&job.owner)
        .bind(job.created_at)
        .bind(job.queued_at)
        .bind(job.attempt_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE ($1::TEXT IS NULL OR owner = $1) \
               AND ($2::TEXT IS NULL OR kind = $2) \
               AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY created_at DESC \
             LIMIT $4"
        );
        let rows = sqlx::query(&query)
            .bind(filter.owner.as_deref())
            .bind(filter.kind.map(|k| k.to_string()))
            .bind(filter.status.map(JobStatus::as_str))
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn claim_next(
        &self,
        kinds: &[JobKind],
        at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        if kinds.is_empty() {
            return Ok(None);
        }
        let kinds: Vec<String> = kinds.iter().map(ToString::to_string).collect();
        let query = format!(
            "UPDATE generation_jobs \
             SET status = 'processing', started_at = $1 \
             WHERE id = ( \
                 SELECT id FROM generation_jobs \
                 WHERE status = 'queued' AND kind = ANY($2) \
                 ORDER BY queued_at ASC, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(at)
            .bind(&kinds)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn apply(
        &self,
        id: JobId,
        attempt: i32,
        transition: &Transition,
    ) -> Result<Option<Job>, StoreError> {
        // $1 = id, $2 = attempt, $3 = expected status; the rest per transition.
        let set = match transition {
            Transition::Claim { .. } => "status = 'processing', started_at = $4",
            Transition::Complete { .. } => {
                "status = 'completed', result_ref = $4, completed_at = $5, \
                 error = NULL, failure_reason = NULL"
            }
            Transition::Fail { .. } => {
                "status = 'failed', failure_reason = $4, error = $5, completed_at = $6, \
                 result_ref = NULL"
            }
            Transition::Requeue { .. } => {
                "status = 'queued', queued_at = $4, started_at = NULL, completed_at = NULL, \
                 result_ref = NULL, error = NULL, failure_reason = NULL, \
                 attempt_count = attempt_count + 1"
            }
        };
        let query = format!(
            "UPDATE generation_jobs SET {set} \
             WHERE id = $1 AND attempt_count = $2 AND status = $3 \
             RETURNING {COLUMNS}"
        );

        let q = sqlx::query(&query)
            .bind(id)
            .bind(attempt)
            .bind(transition.from_status().as_str());
        let q = match transition {
            Transition::Claim { at } | Transition::Requeue { at } => q.bind(*at),
            Transition::Complete { result_ref, at } => q.bind(result_ref.as_str()).bind(*at),
            Transition::Fail { reason, error, at } => {
                q.bind(reason.as_str()).bind(error.as_str()).bind(*at)
            }
        };

        let row = q.fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status = 'processing' AND started_at < $1 \
             ORDER BY started_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(started_before)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS active FROM generation_jobs WHERE status IN ('queued', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        let active: i64 = row.try_get("active")?;
        Ok(active.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
