//! Core domain logic for Sift: resilience primitives and job
//! orchestration for content ingestion.
//!
//! This crate is infrastructure-free. Collaborators (analysis,
//! extraction, scraping, persistence, events) are traits implemented by
//! the enrich and db crates; everything here can be exercised against
//! the in-memory doubles in [`testutil`].

pub mod circuit_breaker;
pub mod dedup;
pub mod error;
pub mod events;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod testutil;
pub mod traits;
pub mod worker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitRegistry, CircuitState,
};
pub use dedup::{DedupEngine, DedupFlags, MinHashIndex, MinHasher};
pub use error::{AppError, FailureKind};
pub use events::{EventSink, EventType, JobEvent, NoopEventSink, TracingEventSink};
pub use job::{
    CreateIngestJobRequest, IngestJob, ItemCounts, JobPriority, JobStatus, RetryConfig,
    WorkerConfig,
};
pub use job_queue::{DeadLetterJob, JobQueue};
pub use models::{Analysis, ContentItem, ExtractedText, Insight};
pub use pipeline::{IngestPipeline, PipelineOutcome};
pub use rate_limit::{
    CachedTierLookup, FixedTierLookup, MemoryRateLimitStore, RateLimitDecision, RateLimitStore,
    RateLimitUsage, TenantRateLimiter, TenantTier, TierLookup, TieredRateLimiter,
};
pub use traits::{
    InsightStore, KeywordSpamClassifier, NoopAnalyzer, NoopScraper, NoopTextExtractor,
    NullInsightStore, Scraper, SpamClassifier, TextAnalyzer, TextExtractor,
};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter, WorkerService};
