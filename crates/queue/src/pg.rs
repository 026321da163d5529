// SPDX-License-Identifier: MIT

//! Postgres-backed queue.
//!
//! Jobs live in the `pbq` schema. Claiming uses `FOR UPDATE SKIP LOCKED`
//! so concurrent subscribers never double-deliver, and singleton dedup is
//! a partial unique index so duplicate sends race safely in the database
//! rather than in application code. Rows are removed when they pass their
//! expiry, which is also what bounds the singleton window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::job::{JobError, JobId, JobState, QueueJob, QueueSize, SendOptions, WorkOptions};
use crate::queue::{JobHandler, Queue, QueueError, WorkHandle};

/// DDL for the queue schema. Applied idempotently at startup.
const SCHEMA_SQL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS pbq",
    "CREATE TABLE IF NOT EXISTS pbq.queue (
        name text PRIMARY KEY,
        created_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS pbq.job (
        id uuid PRIMARY KEY,
        name text NOT NULL REFERENCES pbq.queue(name) ON DELETE CASCADE,
        data jsonb NOT NULL,
        state text NOT NULL DEFAULT 'created',
        priority int NOT NULL DEFAULT 0,
        retry_count int NOT NULL DEFAULT 0,
        retry_limit int NOT NULL DEFAULT 3,
        retry_delay_secs bigint NOT NULL DEFAULT 30,
        singleton_key text,
        start_after timestamptz NOT NULL DEFAULT now(),
        expire_at timestamptz NOT NULL,
        created_at timestamptz NOT NULL DEFAULT now(),
        completed_at timestamptz
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS job_singleton
        ON pbq.job (name, singleton_key)
        WHERE singleton_key IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS job_fetch
        ON pbq.job (name, priority DESC, created_at)
        WHERE state IN ('created', 'retry')",
];

/// Postgres queue implementation.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the queue schema. Idempotent; run once at process startup.
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        for stmt in SCHEMA_SQL {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Expire overdue jobs and drop rows past their expiry.
    ///
    /// Active jobs whose expiry passed are failed through the retry policy;
    /// rows past expiry are deleted outright, which releases their
    /// singleton keys.
    pub async fn maintain(&self) -> Result<u64, QueueError> {
        let expired = sqlx::query(
            "UPDATE pbq.job
             SET state = CASE WHEN retry_count < retry_limit THEN 'retry' ELSE 'failed' END,
                 retry_count = retry_count + 1,
                 start_after = now() + make_interval(secs => retry_delay_secs)
             WHERE state = 'active' AND expire_at < now()",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let deleted = sqlx::query("DELETE FROM pbq.job WHERE expire_at < now() - interval '1 hour'")
            .execute(&self.pool)
            .await?
            .rows_affected();

        if expired + deleted > 0 {
            tracing::debug!(expired, deleted, "queue maintenance pass");
        }
        Ok(expired + deleted)
    }

    /// Claim up to `limit` due jobs from `name`.
    async fn claim(&self, name: &str, limit: i64) -> Result<Vec<QueueJob>, QueueError> {
        let rows = sqlx::query(
            "WITH next AS (
                 SELECT id FROM pbq.job
                 WHERE name = $1 AND state IN ('created', 'retry') AND start_after <= now()
                 ORDER BY priority DESC, created_at
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE pbq.job j
             SET state = 'active'
             FROM next
             WHERE j.id = next.id
             RETURNING j.id, j.name, j.data, j.retry_count, j.retry_limit, j.priority,
                       j.singleton_key, j.created_at, j.start_after",
        )
        .bind(name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Acknowledge a handled job.
    async fn settle(&self, id: JobId, outcome: Result<(), JobError>) -> Result<(), QueueError> {
        match outcome {
            Ok(()) => {
                sqlx::query(
                    "UPDATE pbq.job SET state = 'completed', completed_at = now() WHERE id = $1",
                )
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            }
            Err(JobError::Fail(reason)) => {
                tracing::info!(job_id = %id, %reason, "job failed permanently");
                sqlx::query(
                    "UPDATE pbq.job SET state = 'failed', completed_at = now() WHERE id = $1",
                )
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            }
            Err(JobError::Retry(reason)) => {
                tracing::warn!(job_id = %id, %reason, "job failed, consulting retry policy");
                sqlx::query(
                    "UPDATE pbq.job
                     SET state = CASE WHEN retry_count < retry_limit THEN 'retry' ELSE 'failed' END,
                         retry_count = retry_count + 1,
                         start_after = now() + make_interval(secs => retry_delay_secs),
                         completed_at = CASE WHEN retry_count < retry_limit THEN NULL ELSE now() END
                     WHERE id = $1",
                )
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<QueueJob, QueueError> {
    let id: uuid::Uuid = row.try_get("id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let start_after: DateTime<Utc> = row.try_get("start_after")?;
    let retry_count: i32 = row.try_get("retry_count")?;
    let retry_limit: i32 = row.try_get("retry_limit")?;
    Ok(QueueJob {
        id: JobId(id),
        name: row.try_get("name")?,
        data: row.try_get("data")?,
        state: JobState::Active,
        retry_count: retry_count.max(0) as u32,
        retry_limit: retry_limit.max(0) as u32,
        priority: row.try_get("priority")?,
        singleton_key: row.try_get("singleton_key")?,
        created_at_ms: created_at.timestamp_millis().max(0) as u64,
        start_after_ms: start_after.timestamp_millis().max(0) as u64,
    })
}

fn state_from_str(s: &str) -> JobState {
    match s {
        "active" => JobState::Active,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        "retry" => JobState::Retry,
        _ => JobState::Created,
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn create_queue(&self, name: &str) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO pbq.queue (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM pbq.queue WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn send(
        &self,
        name: &str,
        payload: serde_json::Value,
        opts: SendOptions,
    ) -> Result<Option<JobId>, QueueError> {
        let id = JobId::new();
        let row = sqlx::query(
            "INSERT INTO pbq.job
                 (id, name, data, priority, retry_limit, retry_delay_secs,
                  singleton_key, expire_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now() + make_interval(hours => $8))
             ON CONFLICT (name, singleton_key) WHERE singleton_key IS NOT NULL
             DO NOTHING
             RETURNING id",
        )
        .bind(id.0)
        .bind(name)
        .bind(&payload)
        .bind(opts.priority)
        .bind(opts.retry_limit as i32)
        .bind(opts.retry_delay.as_secs() as i64)
        .bind(&opts.singleton_key)
        .bind(opts.expire_in_hours as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(_) => Ok(Some(id)),
            None => {
                tracing::debug!(queue = name, singleton_key = ?opts.singleton_key, "duplicate send dropped");
                Ok(None)
            }
        }
    }

    async fn work(
        &self,
        name: &str,
        opts: WorkOptions,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkHandle, QueueError> {
        self.create_queue(name).await?;

        let token = CancellationToken::new();
        let queue = self.clone();
        let queue_name = name.to_string();
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(
                opts.team_concurrency.max(1) as usize
            ));
            let mut inflight = tokio::task::JoinSet::new();

            loop {
                if loop_token.is_cancelled() {
                    break;
                }

                let batch = match queue.claim(&queue_name, opts.team_size.max(1) as i64).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(queue = %queue_name, error = %e, "claim failed");
                        Vec::new()
                    }
                };

                let got_work = !batch.is_empty();
                for job in batch {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let handler = handler.clone();
                    let queue = queue.clone();
                    inflight.spawn(async move {
                        let id = job.id;
                        let outcome = handler.handle(job).await;
                        if let Err(e) = queue.settle(id, outcome).await {
                            tracing::warn!(job_id = %id, error = %e, "failed to settle job");
                        }
                        drop(permit);
                    });
                }

                // Reap finished handlers without blocking the poll cadence
                while inflight.try_join_next().is_some() {}

                if !got_work {
                    tokio::select! {
                        _ = loop_token.cancelled() => break,
                        _ = tokio::time::sleep(opts.poll_interval) => {}
                    }
                }
            }

            // Drain in-flight handlers on shutdown
            while inflight.join_next().await.is_some() {}
        });

        Ok(WorkHandle::new(token, vec![task]))
    }

    async fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE pbq.job SET state = 'failed', completed_at = now()
             WHERE id = $1 AND state IN ('created', 'retry', 'active')",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        let rows = sqlx::query("SELECT name FROM pbq.queue ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(QueueError::from))
            .collect()
    }

    async fn get_job_by_id(&self, id: JobId) -> Result<Option<QueueJob>, QueueError> {
        let row = sqlx::query(
            "SELECT id, name, data, state, retry_count, retry_limit, priority, singleton_key,
                    created_at, start_after
             FROM pbq.job WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut job = job_from_row(&row)?;
                let state: String = row.try_get("state")?;
                job.state = state_from_str(&state);
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn get_queue_size(&self, name: &str) -> Result<QueueSize, QueueError> {
        let rows = sqlx::query(
            "SELECT state, count(*) AS n FROM pbq.job WHERE name = $1 GROUP BY state",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let mut size = QueueSize::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            let n = n.max(0) as u64;
            match state.as_str() {
                "created" | "retry" => size.waiting += n,
                "active" => size.active += n,
                "completed" => size.completed += n,
                "failed" => size.failed += n,
                _ => {}
            }
        }
        Ok(size)
    }
}
