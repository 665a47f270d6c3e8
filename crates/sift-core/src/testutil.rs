//! Shared mock implementations for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, FailureKind};
use crate::events::{EventSink, JobEvent};
use crate::job::{CreateIngestJobRequest, IngestJob, ItemCounts, JobStatus, RetryConfig};
use crate::job_queue::{DeadLetterJob, JobQueue};
use crate::models::{Analysis, ContentItem, ExtractedText, Insight, Sentiment};
use crate::traits::{InsightStore, Scraper, TextAnalyzer, TextExtractor};

pub fn make_test_item(id: &str, content: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        url: format!("https://example.com/{id}"),
        content: content.to_string(),
        title: None,
        author: Some("tester".to_string()),
        timestamp: Some(Utc::now()),
        media: Vec::new(),
        platform: "test".to_string(),
        fetch_method: "api".to_string(),
        fetched_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Collaborator mocks
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockAnalyzer {
    pub calls: Arc<Mutex<Vec<String>>>,
    failing: bool,
    fail_on_contains: Option<String>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Fails only for texts containing the given substring.
    pub fn with_failure_on(mut self, needle: &str) -> Self {
        self.fail_on_contains = Some(needle.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl TextAnalyzer for MockAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis, AppError> {
        self.calls.lock().unwrap().push(text.to_string());
        let should_fail = self.failing
            || self
                .fail_on_contains
                .as_deref()
                .is_some_and(|needle| text.contains(needle));
        if should_fail {
            return Err(AppError::NetworkError("mock analyzer failure".into()));
        }
        Ok(Analysis {
            sentiment: Sentiment {
                label: "positive".to_string(),
                score: 0.8,
                confidence: 0.9,
            },
            topics: vec!["testing".to_string()],
            keywords: vec!["mock".to_string()],
            ..Analysis::empty()
        })
    }
}

#[derive(Clone, Default)]
pub struct MockTextExtractor {
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
    failing: bool,
}

impl MockTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl TextExtractor for MockTextExtractor {
    async fn extract_text(&self, media_urls: &[String]) -> Result<ExtractedText, AppError> {
        self.calls.lock().unwrap().push(media_urls.to_vec());
        if self.failing {
            return Err(AppError::Timeout(30));
        }
        Ok(ExtractedText {
            text: "text from image".to_string(),
            confidence: 0.95,
            regions: Vec::new(),
        })
    }
}

#[derive(Clone, Default)]
pub struct MockScraper {
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
    items: Vec<ContentItem>,
    failing: bool,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(mut self, items: Vec<ContentItem>) -> Self {
        self.items = items;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl Scraper for MockScraper {
    async fn scrape_urls(&self, urls: &[String]) -> Result<Vec<ContentItem>, AppError> {
        self.calls.lock().unwrap().push(urls.to_vec());
        if self.failing {
            return Err(AppError::NetworkError("mock scraper failure".into()));
        }
        Ok(self.items.clone())
    }
}

#[derive(Clone, Default)]
pub struct MockInsightStore {
    pub stored: Arc<Mutex<Vec<Insight>>>,
    failing: bool,
}

impl MockInsightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn stored_count(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

impl InsightStore for MockInsightStore {
    async fn store_batch(&self, _job_id: Uuid, insights: &[Insight]) -> Result<u32, AppError> {
        if self.failing {
            return Err(AppError::StoreError("mock store failure".into()));
        }
        let mut stored = self.stored.lock().unwrap();
        stored.extend_from_slice(insights);
        Ok(insights.len() as u32)
    }
}

#[derive(Clone, Default)]
pub struct MockEventSink {
    pub events: Arc<Mutex<Vec<JobEvent>>>,
}

impl MockEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type.as_str().to_string())
            .collect()
    }
}

impl EventSink for MockEventSink {
    async fn publish(&self, event: JobEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory job queue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockQueueState {
    jobs: HashMap<Uuid, IngestJob>,
    dead_letters: Vec<DeadLetterJob>,
    progress_updates: Vec<(Uuid, JobStatus, u8)>,
}

/// In-memory [`JobQueue`] mirroring the Postgres implementation's
/// semantics: idempotent admission, priority-ordered claims, monotonic
/// progress, and terminal statuses that refuse further writes.
#[derive(Clone, Default)]
pub struct MockJobQueue {
    state: Arc<Mutex<MockQueueState>>,
    retry_config: RetryConfig,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterJob> {
        self.state.lock().unwrap().dead_letters.clone()
    }

    /// Every progress update recorded, in call order.
    pub fn progress_updates(&self) -> Vec<(Uuid, JobStatus, u8)> {
        self.state.lock().unwrap().progress_updates.clone()
    }

    /// Forces a pending job's backoff to elapse so it is immediately
    /// claimable again.
    pub fn expire_backoff(&self, job_id: Uuid) {
        if let Some(job) = self.state.lock().unwrap().jobs.get_mut(&job_id) {
            job.next_retry_at = Some(Utc::now() - chrono::TimeDelta::seconds(1));
        }
    }
}

impl JobQueue for MockJobQueue {
    async fn create_job(&self, request: &CreateIngestJobRequest) -> Result<IngestJob, AppError> {
        request.validate()?;
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.jobs.get(&request.id) {
            return Ok(existing.clone());
        }
        let job = IngestJob::from_request(request);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestJob>, AppError> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn claim_job(&self, worker_id: &str) -> Result<Option<IngestJob>, AppError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let candidate = state
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && j.next_retry_at.is_none_or(|at| at <= now)
                    && j.worker_id.is_none()
            })
            .max_by_key(|j| (j.priority.weight(), std::cmp::Reverse(j.created_at)))
            .map(|j| j.id);

        Ok(candidate.map(|id| {
            let job = state.jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Ingesting;
            job.worker_id = Some(worker_id.to_string());
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        status: JobStatus,
        progress_percent: u8,
        counts: &ItemCounts,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.progress_updates.push((job_id, status, progress_percent));
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::DatabaseError(format!("no such job: {job_id}")))?;
        if job.status.is_terminal() {
            return Err(AppError::Cancelled);
        }
        job.status = status;
        job.progress_percent = job.progress_percent.max(progress_percent);
        job.apply_counts(counts);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        counts: &ItemCounts,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::DatabaseError(format!("no such job: {job_id}")))?;
        if job.status.is_terminal() {
            return Err(AppError::Cancelled);
        }
        job.status = status;
        job.progress_percent = 100;
        job.apply_counts(counts);
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        job.worker_id = None;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::DatabaseError(format!("no such job: {job_id}")))?;
        job.next_retry_at = Some(job.calculate_next_retry(&self.retry_config));
        job.retry_count += 1;
        job.status = JobStatus::Pending;
        job.error_message = Some(error.to_string());
        job.worker_id = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::DatabaseError(format!("no such job: {job_id}")))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        job.worker_id = None;
        let entry = DeadLetterJob {
            job_id,
            tenant: job.tenant.clone(),
            error_message: error.to_string(),
            failure_kind: kind,
            retry_count: job.retry_count,
            dead_lettered_at: Utc::now(),
        };
        state.dead_letters.push(entry);
        Ok(())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Failed;
                job.error_message = Some("cancelled".to_string());
                job.completed_at = Some(Utc::now());
                job.worker_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_jobs(
        &self,
        tenant: Option<&str>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<IngestJob>, AppError> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<IngestJob> = state
            .jobs
            .values()
            .filter(|j| tenant.is_none_or(|t| j.tenant == t))
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, AppError> {
        let state = self.state.lock().unwrap();
        let mut counts: Vec<(JobStatus, u64)> = Vec::new();
        for job in state.jobs.values() {
            match counts.iter_mut().find(|(s, _)| *s == job.status) {
                Some((_, n)) => *n += 1,
                None => counts.push((job.status, 1)),
            }
        }
        Ok(counts)
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u32, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        for job in state.jobs.values_mut() {
            if job.worker_id.as_deref() == Some(worker_id) && !job.status.is_terminal() {
                job.status = JobStatus::Pending;
                job.worker_id = None;
                released += 1;
            }
        }
        Ok(released)
    }
}
