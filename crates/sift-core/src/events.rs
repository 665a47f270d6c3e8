//! Job lifecycle events for external real-time delivery.
//!
//! Delivery is best-effort: the pipeline logs and swallows publish failures,
//! an unreachable event consumer must never fail a job.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Named event types emitted over a job's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "job.accepted")]
    JobAccepted,
    #[serde(rename = "processing.started")]
    ProcessingStarted,
    #[serde(rename = "nlp.completed")]
    NlpCompleted,
    #[serde(rename = "partial_result")]
    PartialResult,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobAccepted => "job.accepted",
            EventType::ProcessingStarted => "processing.started",
            EventType::NlpCompleted => "nlp.completed",
            EventType::PartialResult => "partial_result",
            EventType::Complete => "complete",
            EventType::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single job lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub event_type: EventType,
    pub job_id: Uuid,
    pub tenant: String,
    pub timestamp: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
}

impl JobEvent {
    pub fn new(event_type: EventType, job_id: Uuid, tenant: impl Into<String>) -> Self {
        Self {
            event_type,
            job_id,
            tenant: tenant.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Consumer of job lifecycle events (SSE broker, message bus, ...).
pub trait EventSink: Send + Sync + Clone {
    fn publish(&self, event: JobEvent) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Event sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    async fn publish(&self, _event: JobEvent) -> Result<(), AppError> {
        Ok(())
    }
}

/// Event sink that logs events via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    async fn publish(&self, event: JobEvent) -> Result<(), AppError> {
        tracing::info!(
            event = %event.event_type,
            job_id = %event.job_id,
            tenant = %event.tenant,
            data = ?event.data,
            "Job event"
        );
        Ok(())
    }
}
