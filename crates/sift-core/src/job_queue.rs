//! Job queue abstraction for ingestion job lifecycle management.
//!
//! The orchestrator and workers speak to the queue through this trait;
//! the Postgres implementation lives in the db crate and the in-memory
//! mock in [`crate::testutil`].

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, FailureKind};
use crate::job::{CreateIngestJobRequest, IngestJob, ItemCounts, JobStatus};

/// A job that exhausted its retries and was parked for inspection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadLetterJob {
    pub job_id: Uuid,
    pub tenant: String,
    pub error_message: String,
    pub failure_kind: FailureKind,
    pub retry_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Backend-agnostic queue operations for ingestion jobs.
pub trait JobQueue: Send + Sync + Clone {
    /// Admits a new job. Admission is idempotent on the caller-supplied
    /// job id: resubmitting an id returns the existing job unchanged.
    fn create_job(
        &self,
        request: &CreateIngestJobRequest,
    ) -> impl Future<Output = Result<IngestJob, AppError>> + Send;

    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<IngestJob>, AppError>> + Send;

    /// Atomically claims the next runnable job for a worker. Runnable
    /// means pending with no future `next_retry_at`, ordered by priority
    /// weight then age. Returns `None` when the queue is empty.
    fn claim_job(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<IngestJob>, AppError>> + Send;

    /// Records stage progress. Implementations must keep
    /// `progress_percent` monotonic for the life of the job, and must
    /// refuse the write with [`AppError::Cancelled`] once the job has
    /// reached a terminal status (e.g. cancelled mid-flight).
    fn update_progress(
        &self,
        job_id: Uuid,
        status: JobStatus,
        progress_percent: u8,
        counts: &ItemCounts,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Finalizes a job in a terminal success state (`Completed` or
    /// `Partial`), stamping `completed_at` and forcing progress to 100.
    /// Refuses with [`AppError::Cancelled`] if the job is already
    /// terminal.
    fn complete_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counts: &ItemCounts,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Schedules a retry: increments the retry count, computes
    /// `next_retry_at` from the backoff schedule, releases the worker
    /// claim, and returns the job to `Pending`.
    fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Terminal failure: marks the job `Failed` and records a dead-letter
    /// entry for later inspection or replay.
    fn dead_letter(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Cancels a job that has not reached a terminal state. Returns false
    /// when the job was already terminal or unknown.
    fn cancel_job(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn list_jobs(
        &self,
        tenant: Option<&str>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<IngestJob>, AppError>> + Send;

    fn count_by_status(
        &self,
    ) -> impl Future<Output = Result<Vec<(JobStatus, u64)>, AppError>> + Send;

    /// Returns every job still claimed by a worker to `Pending`. Called
    /// on worker shutdown so in-flight work is not stranded.
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u32, AppError>> + Send;
}
