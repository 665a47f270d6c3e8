//! Worker service: claims jobs from the queue and runs them through the
//! pipeline until shutdown.
//!
//! Failure handling: a retryable error on a job with retries left goes
//! back to the queue with backoff; anything else is dead-lettered.
//! Cancellation mid-job releases the claim at shutdown instead.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, FailureKind};
use crate::events::EventSink;
use crate::job::{IngestJob, JobStatus, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::pipeline::IngestPipeline;
use crate::traits::{InsightStore, Scraper, TextAnalyzer, TextExtractor};

/// Lifecycle notifications emitted by the worker loop.
#[derive(Debug)]
pub enum WorkerEvent {
    JobStarted {
        job_id: Uuid,
        tenant: String,
        attempt: u32,
    },
    JobCompleted {
        job_id: Uuid,
        status: JobStatus,
        succeeded: u32,
        failed: u32,
    },
    JobRetryScheduled {
        job_id: Uuid,
        attempt: u32,
        error: String,
    },
    JobDeadLettered {
        job_id: Uuid,
        kind: FailureKind,
        error: String,
    },
    JobInterrupted {
        job_id: Uuid,
    },
    ShuttingDown {
        released: u32,
    },
}

/// Observer for worker lifecycle events.
pub trait WorkerReporter: Send + Sync {
    fn on_event(&self, event: &WorkerEvent);
}

/// Default reporter that logs events via tracing.
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn on_event(&self, event: &WorkerEvent) {
        match event {
            WorkerEvent::JobStarted {
                job_id,
                tenant,
                attempt,
            } => {
                tracing::info!(%job_id, tenant, attempt, "Job started");
            }
            WorkerEvent::JobCompleted {
                job_id,
                status,
                succeeded,
                failed,
            } => {
                tracing::info!(%job_id, %status, succeeded, failed, "Job completed");
            }
            WorkerEvent::JobRetryScheduled {
                job_id,
                attempt,
                error,
            } => {
                tracing::warn!(%job_id, attempt, error, "Job retry scheduled");
            }
            WorkerEvent::JobDeadLettered {
                job_id,
                kind,
                error,
            } => {
                tracing::error!(%job_id, kind = %kind, error, "Job dead-lettered");
            }
            WorkerEvent::JobInterrupted { job_id } => {
                tracing::info!(%job_id, "Job interrupted by shutdown");
            }
            WorkerEvent::ShuttingDown { released } => {
                tracing::info!(released, "Worker shutting down");
            }
        }
    }
}

// Deterministic-seed xorshift, good enough for spreading poll wakeups
// across workers without pulling in a random-number crate.
struct Jitter(u64);

impl Jitter {
    fn new(seed: &str) -> Self {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        for b in seed.bytes() {
            state = state.rotate_left(8) ^ u64::from(b);
        }
        Self(state.max(1))
    }

    /// Base duration +/- up to 20%.
    fn apply(&mut self, base: Duration) -> Duration {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        let spread = (self.0 % 41) as i64 - 20;
        let millis = base.as_millis() as i64;
        Duration::from_millis((millis + millis * spread / 100).max(1) as u64)
    }
}

/// Polls the queue and drives claimed jobs through the pipeline.
pub struct WorkerService<Q, A, X, Sc, St, E, R> {
    queue: Q,
    pipeline: IngestPipeline<Q, A, X, Sc, St, E>,
    config: WorkerConfig,
    reporter: R,
}

impl<Q, A, X, Sc, St, E, R> WorkerService<Q, A, X, Sc, St, E, R>
where
    Q: JobQueue,
    A: TextAnalyzer,
    X: TextExtractor,
    Sc: Scraper,
    St: InsightStore,
    E: EventSink,
    R: WorkerReporter,
{
    pub fn new(
        queue: Q,
        pipeline: IngestPipeline<Q, A, X, Sc, St, E>,
        config: WorkerConfig,
        reporter: R,
    ) -> Self {
        Self {
            queue,
            pipeline,
            config,
            reporter,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Runs the poll loop until the token is cancelled, then releases
    /// any jobs still claimed by this worker.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.config.worker_id, "Worker started");
        let mut jitter = Jitter::new(&self.config.worker_id);

        while !cancel.is_cancelled() {
            match self.run_once(&cancel).await {
                Ok(true) => continue,
                Ok(false) => {
                    let sleep = jitter.apply(self.config.poll_interval);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(worker_id = %self.config.worker_id, error = %e, "Claim failed");
                    let sleep = jitter.apply(self.config.poll_interval);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
            }
        }

        match self.queue.release_worker_jobs(&self.config.worker_id).await {
            Ok(released) => {
                self.reporter.on_event(&WorkerEvent::ShuttingDown { released });
            }
            Err(e) => {
                tracing::error!(
                    worker_id = %self.config.worker_id,
                    error = %e,
                    "Failed to release claimed jobs on shutdown"
                );
            }
        }
    }

    /// Claims and processes at most one job. Returns whether a job was
    /// handled.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<bool, AppError> {
        let Some(job) = self.queue.claim_job(&self.config.worker_id).await? else {
            return Ok(false);
        };
        self.handle_job(job, cancel).await;
        Ok(true)
    }

    async fn handle_job(&self, job: IngestJob, cancel: &CancellationToken) {
        self.reporter.on_event(&WorkerEvent::JobStarted {
            job_id: job.id,
            tenant: job.tenant.clone(),
            attempt: job.retry_count + 1,
        });

        match self.pipeline.process_job(&job, cancel).await {
            Ok(outcome) => {
                self.reporter.on_event(&WorkerEvent::JobCompleted {
                    job_id: job.id,
                    status: outcome.status,
                    succeeded: outcome.counts.succeeded,
                    failed: outcome.counts.failed,
                });
            }
            Err(AppError::Cancelled) => {
                // Shutdown in flight. The claim is released in run().
                self.reporter
                    .on_event(&WorkerEvent::JobInterrupted { job_id: job.id });
            }
            Err(e) => {
                self.pipeline.publish_error(&job, &e).await;

                if e.is_retryable() && job.can_retry() {
                    if let Err(q) = self.queue.fail_job(job.id, &e.to_string()).await {
                        tracing::error!(job_id = %job.id, error = %q, "Failed to schedule retry");
                        return;
                    }
                    self.reporter.on_event(&WorkerEvent::JobRetryScheduled {
                        job_id: job.id,
                        attempt: job.retry_count + 1,
                        error: e.to_string(),
                    });
                } else {
                    let kind = e.failure_kind();
                    if let Err(q) = self.queue.dead_letter(job.id, &e.to_string(), kind).await {
                        tracing::error!(job_id = %job.id, error = %q, "Failed to dead-letter job");
                        return;
                    }
                    self.reporter.on_event(&WorkerEvent::JobDeadLettered {
                        job_id: job.id,
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::job::CreateIngestJobRequest;
    use crate::testutil::{
        make_test_item, MockAnalyzer, MockEventSink, MockInsightStore, MockJobQueue, MockScraper,
        MockTextExtractor,
    };

    #[derive(Clone, Default)]
    struct RecordingReporter {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl WorkerReporter for RecordingReporter {
        fn on_event(&self, event: &WorkerEvent) {
            let label = match event {
                WorkerEvent::JobStarted { .. } => "started",
                WorkerEvent::JobCompleted { .. } => "completed",
                WorkerEvent::JobRetryScheduled { .. } => "retry",
                WorkerEvent::JobDeadLettered { .. } => "dead_letter",
                WorkerEvent::JobInterrupted { .. } => "interrupted",
                WorkerEvent::ShuttingDown { .. } => "shutdown",
            };
            self.events.lock().unwrap().push(label.to_string());
        }
    }

    impl RecordingReporter {
        fn labels(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    fn make_worker(
        queue: MockJobQueue,
        analyzer: MockAnalyzer,
    ) -> WorkerService<
        MockJobQueue,
        MockAnalyzer,
        MockTextExtractor,
        MockScraper,
        MockInsightStore,
        MockEventSink,
        RecordingReporter,
    > {
        let pipeline = IngestPipeline::new(
            queue.clone(),
            analyzer,
            MockTextExtractor::new(),
            MockScraper::new(),
            MockInsightStore::new(),
            MockEventSink::new(),
        );
        WorkerService::new(
            queue,
            pipeline,
            WorkerConfig::default().with_worker_id("worker-test"),
            RecordingReporter::default(),
        )
    }

    async fn submit(queue: &MockJobQueue, content: &str) -> IngestJob {
        queue
            .create_job(
                &CreateIngestJobRequest::new("acme", "social")
                    .with_items(vec![make_test_item("a", content)]),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_once_with_empty_queue() {
        let worker = make_worker(MockJobQueue::new(), MockAnalyzer::new());
        let handled = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_run_once_processes_job_to_completion() {
        let queue = MockJobQueue::new();
        let job = submit(&queue, "some nice content").await;
        let worker = make_worker(queue.clone(), MockAnalyzer::new());

        let handled = worker.run_once(&CancellationToken::new()).await.unwrap();
        assert!(handled);

        let stored = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(
            worker.reporter.labels(),
            vec!["started".to_string(), "completed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_retryable_failure_schedules_retry() {
        let queue = MockJobQueue::new();
        let job = submit(&queue, "content").await;
        // Network errors from the analyzer are retryable.
        let worker = make_worker(queue.clone(), MockAnalyzer::new().with_failure());

        worker.run_once(&CancellationToken::new()).await.unwrap();

        let stored = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.next_retry_at.is_some());
        assert!(worker.reporter.labels().contains(&"retry".to_string()));
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let queue = MockJobQueue::new();
        let request = CreateIngestJobRequest::new("acme", "social")
            .with_items(vec![make_test_item("a", "content")])
            .with_max_retries(0);
        let job = queue.create_job(&request).await.unwrap();
        let worker = make_worker(queue.clone(), MockAnalyzer::new().with_failure());

        worker.run_once(&CancellationToken::new()).await.unwrap();

        let stored = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job_id, job.id);
        assert_eq!(dead[0].failure_kind, FailureKind::Replayable);
    }

    #[tokio::test]
    async fn test_retries_until_exhaustion_with_growing_backoff() {
        let queue = MockJobQueue::new();
        let request = CreateIngestJobRequest::new("acme", "social")
            .with_items(vec![make_test_item("a", "content")])
            .with_max_retries(3);
        let job = queue.create_job(&request).await.unwrap();
        let worker = make_worker(queue.clone(), MockAnalyzer::new().with_failure());

        let mut delays = Vec::new();
        for attempt in 1..=3u32 {
            worker.run_once(&CancellationToken::new()).await.unwrap();

            let stored = queue.get_job(job.id).await.unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Pending);
            assert_eq!(stored.retry_count, attempt);
            delays.push(stored.next_retry_at.unwrap() - stored.updated_at);

            queue.expire_backoff(job.id);
        }

        // 10s, 40s, 300s
        assert!(delays[0] < delays[1], "{:?} < {:?}", delays[0], delays[1]);
        assert!(delays[1] < delays[2], "{:?} < {:?}", delays[1], delays[2]);

        // The fourth attempt has no retries left.
        worker.run_once(&CancellationToken::new()).await.unwrap();

        let stored = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 3);
    }

    #[tokio::test]
    async fn test_interrupted_job_is_not_dead_lettered() {
        let queue = MockJobQueue::new();
        let job = submit(&queue, "content").await;
        let worker = make_worker(queue.clone(), MockAnalyzer::new());

        let cancel = CancellationToken::new();
        cancel.cancel();
        // claim_job succeeds, then the pipeline observes cancellation.
        worker.run_once(&cancel).await.unwrap();

        assert!(queue.dead_letters().is_empty());
        assert!(worker.reporter.labels().contains(&"interrupted".to_string()));

        // Shutdown releases the claim so another worker can pick it up.
        let released = queue.release_worker_jobs("worker-test").await.unwrap();
        assert_eq!(released, 1);
        let stored = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let worker = make_worker(MockJobQueue::new(), MockAnalyzer::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        worker.run(cancel).await;

        assert_eq!(worker.reporter.labels(), vec!["shutdown".to_string()]);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut jitter = Jitter::new("worker-1");
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jitter.apply(base);
            assert!(d >= Duration::from_millis(800));
            assert!(d <= Duration::from_millis(1200));
        }
    }
}
