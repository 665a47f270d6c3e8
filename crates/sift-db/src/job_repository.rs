use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sift_core::error::{AppError, FailureKind};
use sift_core::job::{
    CreateIngestJobRequest, IngestJob, ItemCounts, JobPriority, JobStatus, RetryConfig,
};
use sift_core::job_queue::JobQueue;

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct IngestJobRepository {
    pool: Pool<Postgres>,
    retry_config: RetryConfig,
}

impl IngestJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct IngestJobRow {
    id: Uuid,
    tenant: String,
    source_type: String,
    priority: String,
    status: String,
    mode: String,
    items: serde_json::Value,
    source_urls: serde_json::Value,
    items_total: i32,
    items_processed: i32,
    items_succeeded: i32,
    items_failed: i32,
    progress_percent: i16,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
}

impl From<IngestJobRow> for IngestJob {
    fn from(row: IngestJobRow) -> Self {
        IngestJob {
            id: row.id,
            tenant: row.tenant,
            source_type: row.source_type,
            priority: row.priority.parse().unwrap_or(JobPriority::Normal),
            status: row.status.parse().unwrap_or(JobStatus::Pending),
            mode: row.mode,
            items: serde_json::from_value(row.items).unwrap_or_default(),
            source_urls: serde_json::from_value(row.source_urls).unwrap_or_default(),
            items_total: row.items_total.max(0) as u32,
            items_processed: row.items_processed.max(0) as u32,
            items_succeeded: row.items_succeeded.max(0) as u32,
            items_failed: row.items_failed.max(0) as u32,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            next_retry_at: row.next_retry_at,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            worker_id: row.worker_id,
        }
    }
}

impl JobQueue for IngestJobRepository {
    async fn create_job(&self, request: &CreateIngestJobRequest) -> Result<IngestJob, AppError> {
        request.validate()?;

        let items = serde_json::to_value(&request.items)?;
        let source_urls = serde_json::to_value(&request.source_urls)?;
        let max_retries = request
            .max_retries
            .unwrap_or(self.retry_config.max_retries) as i32;

        // The job id is the idempotency key: a resubmitted id inserts
        // nothing and the existing row is returned instead.
        let inserted = sqlx::query_as::<_, IngestJobRow>(
            r#"
            INSERT INTO ingest_jobs
                (id, tenant, source_type, priority, mode, items, source_urls,
                 items_total, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(&request.tenant)
        .bind(&request.source_type)
        .bind(request.priority.as_str())
        .bind(&request.mode)
        .bind(&items)
        .bind(&source_urls)
        .bind(request.items.len() as i32)
        .bind(max_retries)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        self.get_job(request.id).await?.ok_or_else(|| {
            AppError::DatabaseError(format!("job {} vanished during idempotent insert", request.id))
        })
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestJob>, AppError> {
        let row = sqlx::query_as::<_, IngestJobRow>(r#"SELECT * FROM ingest_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn claim_job(&self, worker_id: &str) -> Result<Option<IngestJob>, AppError> {
        let row = sqlx::query_as::<_, IngestJobRow>(
            r#"
            UPDATE ingest_jobs
            SET status = 'ingesting', worker_id = $1, started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM ingest_jobs
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY
                    CASE priority WHEN 'high' THEN 2 WHEN 'normal' THEN 1 ELSE 0 END DESC,
                    created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        status: JobStatus,
        progress_percent: u8,
        counts: &ItemCounts,
    ) -> Result<(), AppError> {
        // GREATEST keeps progress monotonic even if updates arrive out
        // of order. Terminal statuses are final: a job cancelled while a
        // worker holds it must not be moved back to an active status.
        let result = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = $2,
                progress_percent = GREATEST(progress_percent, $3),
                items_total = $4, items_processed = $5,
                items_succeeded = $6, items_failed = $7,
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('completed', 'partial', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(progress_percent.min(100) as i16)
        .bind(counts.total as i32)
        .bind(counts.processed as i32)
        .bind(counts.succeeded as i32)
        .bind(counts.failed as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counts: &ItemCounts,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = $2, progress_percent = 100,
                items_total = $3, items_processed = $4,
                items_succeeded = $5, items_failed = $6,
                completed_at = NOW(), updated_at = NOW(),
                error_message = NULL, worker_id = NULL
            WHERE id = $1
              AND status NOT IN ('completed', 'partial', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(counts.total as i32)
        .bind(counts.processed as i32)
        .bind(counts.succeeded as i32)
        .bind(counts.failed as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        let job = self.get_job(job_id).await?.ok_or_else(|| {
            AppError::DatabaseError(format!("cannot fail unknown job {job_id}"))
        })?;
        let next_retry_at = job.calculate_next_retry(&self.retry_config);

        sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = 'pending', retry_count = retry_count + 1,
                next_retry_at = $2, error_message = $3,
                worker_id = NULL, started_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(next_retry_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = 'failed', error_message = $2,
                completed_at = NOW(), updated_at = NOW(), worker_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO dead_letter_jobs (job_id, tenant, error_message, failure_kind, retry_count)
            SELECT id, tenant, $2, $3, retry_count FROM ingest_jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = 'failed', error_message = 'cancelled',
                completed_at = NOW(), updated_at = NOW(), worker_id = NULL
            WHERE id = $1 AND status NOT IN ('completed', 'partial', 'failed')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_jobs(
        &self,
        tenant: Option<&str>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<IngestJob>, AppError> {
        let rows = sqlx::query_as::<_, IngestJobRow>(
            r#"
            SELECT * FROM ingest_jobs
            WHERE ($1::text IS NULL OR tenant = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant)
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM ingest_jobs GROUP BY status ORDER BY status"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| {
                status
                    .parse::<JobStatus>()
                    .ok()
                    .map(|s| (s, count.max(0) as u64))
            })
            .collect())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u32, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
            WHERE worker_id = $1
              AND status NOT IN ('completed', 'partial', 'failed')
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() as u32)
    }
}
