//! Postgres job queue. Claiming uses `FOR UPDATE SKIP LOCKED`, so any number
//! of workers can poll the same queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Postgres;
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::Query;
use std::time::Duration;

use super::{JobId, JobQueue, JobRecord, JobState};
use crate::common::error::{GoalSyncError, Result};

const JOB_COLUMNS: &str =
    "id, queue, payload, state, run_at, attempts, lease_expires_at, last_error, created_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    queue: String,
    payload: serde_json::Value,
    state: String,
    run_at: DateTime<Utc>,
    attempts: i32,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = GoalSyncError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            state: row.state.parse()?,
            run_at: row.run_at,
            attempts: row.attempts,
            lease_expires_at: row.lease_expires_at,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs a guarded update keyed by job id. Returns `false` when the job
    /// exists but the guard did not match.
    async fn update_job(
        &self,
        job_id: JobId,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<bool> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM _goal_sync_jobs WHERE id = $1)")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(GoalSyncError::NotFound(format!("job {job_id}")))
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _goal_sync_queues (
                name TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _goal_sync_jobs (
                id BIGSERIAL PRIMARY KEY,
                queue TEXT NOT NULL REFERENCES _goal_sync_queues (name),
                payload JSONB NOT NULL,
                state TEXT NOT NULL DEFAULT 'CREATED',
                run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                attempts INTEGER NOT NULL DEFAULT 0,
                lease_expires_at TIMESTAMPTZ,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS _goal_sync_jobs_due_idx
             ON _goal_sync_jobs (queue, state, run_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_queue(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO _goal_sync_queues (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<JobId> {
        let delay_secs = delay.unwrap_or_default().as_secs_f64();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO _goal_sync_jobs (queue, payload, run_at)
             VALUES ($1, $2, NOW() + make_interval(secs => $3))
             RETURNING id",
        )
        .bind(queue)
        .bind(payload)
        .bind(delay_secs)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn claim(&self, queue: &str, limit: usize, lease: Duration) -> Result<Vec<JobRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE _goal_sync_jobs
             SET state = 'ACTIVE',
                 attempts = attempts + 1,
                 lease_expires_at = NOW() + make_interval(secs => $3),
                 updated_at = NOW()
             WHERE id IN (
                 SELECT id FROM _goal_sync_jobs
                 WHERE queue = $1
                   AND ((state = 'CREATED' AND run_at <= NOW())
                     OR (state = 'ACTIVE' AND lease_expires_at < NOW()))
                 ORDER BY run_at
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(queue)
        .bind(limit)
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn complete(&self, job_id: JobId) -> Result<bool> {
        let query = sqlx::query(
            "UPDATE _goal_sync_jobs
             SET state = 'COMPLETED', lease_expires_at = NULL, updated_at = NOW()
             WHERE id = $1 AND state IN ('CREATED', 'ACTIVE')",
        )
        .bind(job_id);
        self.update_job(job_id, query).await
    }

    async fn fail(&self, job_id: JobId, error: &str) -> Result<bool> {
        let query = sqlx::query(
            "UPDATE _goal_sync_jobs
             SET state = 'FAILED', lease_expires_at = NULL, last_error = $2, updated_at = NOW()
             WHERE id = $1 AND state = 'ACTIVE'",
        )
        .bind(job_id)
        .bind(error);
        self.update_job(job_id, query).await
    }

    async fn reschedule(&self, job_id: JobId, run_at: DateTime<Utc>) -> Result<bool> {
        let query = sqlx::query(
            "UPDATE _goal_sync_jobs
             SET state = 'CREATED', run_at = $2, lease_expires_at = NULL, updated_at = NOW()
             WHERE id = $1 AND state = 'ACTIVE'",
        )
        .bind(job_id)
        .bind(run_at);
        self.update_job(job_id, query).await
    }

    async fn list_active(&self, queue: &str) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM _goal_sync_jobs
             WHERE queue = $1 AND state IN ('{}', '{}')
             ORDER BY id",
            JobState::Created.as_str(),
            JobState::Active.as_str()
        ))
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }
}
