use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ContentItem;

/// Status of an ingestion job as it moves through the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Ingesting,
    Processing,
    Enriching,
    Completed,
    /// Some items failed individually, but at least one succeeded.
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ingesting => "ingesting",
            JobStatus::Processing => "processing",
            JobStatus::Enriching => "enriching",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "ingesting" => Ok(JobStatus::Ingesting),
            "processing" => Ok(JobStatus::Processing),
            "enriching" => Ok(JobStatus::Enriching),
            "completed" => Ok(JobStatus::Completed),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Priority of a job within the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
        }
    }

    /// Ordering weight for claim queries (higher is claimed first).
    pub fn weight(&self) -> i16 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Normal => 1,
            JobPriority::High => 2,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            _ => Err(format!("Unknown job priority: {}", s)),
        }
    }
}

/// Retry configuration with increasing backoff.
///
/// Delay schedule: 10s, 40s, 300s (capped).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: TimeDelta::seconds(300),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt number (1-indexed).
    ///
    /// - Attempt 1: 10 seconds
    /// - Attempt 2: 40 seconds
    /// - Attempt 3+: 300 seconds (capped by max_delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let delay = match attempt {
            0 | 1 => TimeDelta::seconds(10),
            2 => TimeDelta::seconds(40),
            _ => TimeDelta::seconds(300),
        };
        std::cmp::min(delay, self.max_delay)
    }
}

/// Per-item outcome counts for a job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub total: u32,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// An ingestion job in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: Uuid,
    pub tenant: String,
    pub source_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Processing mode requested by the caller (e.g. "full", "fast").
    pub mode: String,
    /// Pre-fetched items carried with the job so any worker can process
    /// it after claiming.
    #[serde(default)]
    pub items: Vec<ContentItem>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    pub items_total: u32,
    pub items_processed: u32,
    pub items_succeeded: u32,
    pub items_failed: u32,
    pub progress_percent: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

impl IngestJob {
    /// Fresh pending job from an admission request.
    pub fn from_request(request: &CreateIngestJobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: request.id,
            tenant: request.tenant.clone(),
            source_type: request.source_type.clone(),
            priority: request.priority,
            status: JobStatus::Pending,
            mode: request.mode.clone(),
            items: request.items.clone(),
            source_urls: request.source_urls.clone(),
            items_total: request.items.len() as u32,
            items_processed: 0,
            items_succeeded: 0,
            items_failed: 0,
            progress_percent: 0,
            retry_count: 0,
            max_retries: request
                .max_retries
                .unwrap_or(RetryConfig::default().max_retries),
            next_retry_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }

    pub fn apply_counts(&mut self, counts: &ItemCounts) {
        self.items_total = counts.total;
        self.items_processed = counts.processed;
        self.items_succeeded = counts.succeeded;
        self.items_failed = counts.failed;
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn calculate_next_retry(&self, config: &RetryConfig) -> DateTime<Utc> {
        let delay = config.delay_for_attempt(self.retry_count + 1);
        Utc::now() + delay
    }
}

/// Request to create a new ingestion job.
///
/// The job id doubles as the idempotency key for task-queue delivery:
/// callers may supply one, otherwise it is generated once at admission.
#[derive(Debug, Clone)]
pub struct CreateIngestJobRequest {
    pub id: Uuid,
    pub tenant: String,
    pub source_type: String,
    pub priority: JobPriority,
    pub mode: String,
    /// Pre-fetched items supplied by the caller. When empty, the
    /// pipeline scrapes `source_urls` instead.
    pub items: Vec<ContentItem>,
    pub source_urls: Vec<String>,
    pub max_retries: Option<u32>,
}

impl CreateIngestJobRequest {
    pub fn new(tenant: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            source_type: source_type.into(),
            priority: JobPriority::Normal,
            mode: "full".to_string(),
            items: Vec::new(),
            source_urls: Vec::new(),
            max_retries: None,
        }
    }

    /// Use a caller-supplied job id (idempotency key).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_items(mut self, items: Vec<ContentItem>) -> Self {
        self.items = items;
        self
    }

    pub fn with_source_urls(mut self, urls: Vec<String>) -> Self {
        self.source_urls = urls;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Validate the request at the admission boundary.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.tenant.trim().is_empty() {
            return Err(crate::error::AppError::ValidationError(
                "tenant must not be empty".into(),
            ));
        }
        if self.items.is_empty() && self.source_urls.is_empty() {
            return Err(crate::error::AppError::ValidationError(
                "either items or source_urls must be provided".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub retry_config: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(5),
            retry_config: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Ingesting,
            JobStatus::Processing,
            JobStatus::Enriching,
            JobStatus::Completed,
            JobStatus::Partial,
            JobStatus::Failed,
        ] {
            let s = status.as_str();
            let parsed: JobStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Ingesting.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Enriching.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Partial.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_retry_delay_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), TimeDelta::seconds(10));
        assert_eq!(config.delay_for_attempt(2), TimeDelta::seconds(40));
        assert_eq!(config.delay_for_attempt(3), TimeDelta::seconds(300));
        assert_eq!(config.delay_for_attempt(4), TimeDelta::seconds(300));
    }

    #[test]
    fn test_priority_claim_weight() {
        assert!(JobPriority::High.weight() > JobPriority::Normal.weight());
        assert!(JobPriority::Normal.weight() > JobPriority::Low.weight());
    }

    #[test]
    fn test_create_request_builder() {
        let req = CreateIngestJobRequest::new("acme", "web")
            .with_priority(JobPriority::High)
            .with_source_urls(vec!["https://example.com".into()])
            .with_max_retries(5);

        assert_eq!(req.tenant, "acme");
        assert_eq!(req.priority, JobPriority::High);
        assert_eq!(req.max_retries, Some(5));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_create_request_validation() {
        let empty_tenant = CreateIngestJobRequest::new("  ", "web")
            .with_source_urls(vec!["https://example.com".into()]);
        assert!(empty_tenant.validate().is_err());

        let no_sources = CreateIngestJobRequest::new("acme", "web");
        assert!(no_sources.validate().is_err());
    }
}
