//! Ingestion pipeline orchestration.
//!
//! Drives one claimed job through its stages: item acquisition (supplied
//! or scraped), batch dedup, per-item spam/analysis/extraction, insight
//! persistence, and terminal-state resolution. Every external call goes
//! through a circuit breaker; item-level trouble degrades or skips the
//! item instead of failing the job.
//!
//! Progress checkpoints: 10 (ingesting), 30 (items acquired), 30..80
//! (item loop), 80 (enriching), 90 (stored), 100 (terminal). Reported
//! progress never decreases.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerError, CircuitRegistry};
use crate::dedup::{DedupEngine, DedupFlags};
use crate::error::AppError;
use crate::events::{EventSink, EventType, JobEvent};
use crate::job::{IngestJob, ItemCounts, JobStatus};
use crate::job_queue::JobQueue;
use crate::models::{Analysis, ContentItem, ExtractedText, Insight, Provenance};
use crate::traits::{
    InsightStore, KeywordSpamClassifier, Scraper, SpamClassifier, TextAnalyzer, TextExtractor,
};

/// Clamps reported progress so it never moves backwards.
#[derive(Debug, Default)]
struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    fn advance(&mut self, target: u8) -> u8 {
        self.last = self.last.max(target.min(100));
        self.last
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub counts: ItemCounts,
    pub duplicates: u32,
    pub stored: u32,
}

/// Orchestrates ingestion jobs over pluggable collaborators.
#[derive(Clone)]
pub struct IngestPipeline<Q, A, X, Sc, St, E> {
    queue: Q,
    analyzer: A,
    extractor: X,
    scraper: Sc,
    store: St,
    events: E,
    circuits: CircuitRegistry,
    spam: KeywordSpamClassifier,
}

impl<Q, A, X, Sc, St, E> IngestPipeline<Q, A, X, Sc, St, E>
where
    Q: JobQueue,
    A: TextAnalyzer,
    X: TextExtractor,
    Sc: Scraper,
    St: InsightStore,
    E: EventSink,
{
    pub fn new(queue: Q, analyzer: A, extractor: X, scraper: Sc, store: St, events: E) -> Self {
        Self {
            queue,
            analyzer,
            extractor,
            scraper,
            store,
            events,
            circuits: CircuitRegistry::new(),
            spam: KeywordSpamClassifier::default(),
        }
    }

    /// Share an externally-constructed breaker registry (one per process).
    pub fn with_circuits(mut self, circuits: CircuitRegistry) -> Self {
        self.circuits = circuits;
        self
    }

    pub fn with_spam_classifier(mut self, spam: KeywordSpamClassifier) -> Self {
        self.spam = spam;
        self
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Runs one claimed job to a terminal state.
    ///
    /// Returns `Err` only for job-level trouble (item acquisition failed,
    /// persistence failed, every item failed, cancellation). The caller
    /// decides between retry and dead-letter from the error.
    pub async fn process_job(
        &self,
        job: &IngestJob,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut progress = ProgressTracker::default();
        // A retried job resumes reporting from where it left off.
        progress.advance(job.progress_percent);
        let mut counts = ItemCounts::default();

        self.emit(JobEvent::new(
            EventType::ProcessingStarted,
            job.id,
            &job.tenant,
        ))
        .await;
        self.report(job, JobStatus::Ingesting, progress.advance(10), &counts)
            .await?;

        let items = self.acquire_items(job).await?;
        counts.total = items.len() as u32;
        self.report(job, JobStatus::Processing, progress.advance(30), &counts)
            .await?;

        if items.is_empty() {
            tracing::info!(job_id = %job.id, "No items to process, completing");
            self.queue
                .complete_job(job.id, JobStatus::Completed, &counts)
                .await?;
            self.emit_complete(job, JobStatus::Completed, &counts, 0).await;
            return Ok(PipelineOutcome {
                job_id: job.id,
                status: JobStatus::Completed,
                counts,
                duplicates: 0,
                stored: 0,
            });
        }

        let mut dedup = DedupEngine::new();
        let flags = dedup.deduplicate_batch(&items);
        let duplicates = flags.iter().filter(|f| f.is_duplicate).count() as u32;

        let total = items.len();
        let mut insights: Vec<Insight> = Vec::with_capacity(total);
        let mut last_item_error: Option<AppError> = None;

        for (idx, (item, item_flags)) in items.iter().zip(flags.iter()).enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match self.process_item(job, item, item_flags).await {
                Ok(insight) => {
                    counts.succeeded += 1;
                    insights.push(insight);
                }
                Err(e) => {
                    counts.failed += 1;
                    tracing::warn!(
                        job_id = %job.id,
                        item_id = %item.id,
                        error = %e,
                        "Item processing failed, continuing"
                    );
                    last_item_error = Some(e);
                }
            }
            counts.processed += 1;

            let pct = 30 + ((idx + 1) * 50 / total) as u8;
            self.report(job, JobStatus::Processing, progress.advance(pct), &counts)
                .await?;
        }

        self.report(job, JobStatus::Enriching, progress.advance(80), &counts)
            .await?;
        self.emit(
            JobEvent::new(EventType::NlpCompleted, job.id, &job.tenant).with_data(json!({
                "items_total": counts.total,
                "succeeded": counts.succeeded,
                "failed": counts.failed,
                "duplicates": duplicates,
            })),
        )
        .await;

        let stored = if insights.is_empty() {
            0
        } else {
            self.store.store_batch(job.id, &insights).await?
        };
        self.report(job, JobStatus::Enriching, progress.advance(90), &counts)
            .await?;

        // A run where nothing succeeded is a job-level failure. Surface
        // the last item error so retry classification sees the real cause.
        if counts.succeeded == 0 && counts.failed > 0 {
            return Err(last_item_error.unwrap_or_else(|| {
                AppError::Generic(format!("all {} items failed processing", counts.failed))
            }));
        }

        let status = if counts.failed > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Completed
        };
        self.queue.complete_job(job.id, status, &counts).await?;

        if status == JobStatus::Partial {
            self.emit(
                JobEvent::new(EventType::PartialResult, job.id, &job.tenant).with_data(json!({
                    "succeeded": counts.succeeded,
                    "failed": counts.failed,
                })),
            )
            .await;
        }
        self.emit_complete(job, status, &counts, stored).await;

        tracing::info!(
            job_id = %job.id,
            status = %status,
            succeeded = counts.succeeded,
            failed = counts.failed,
            duplicates,
            "Job finished"
        );

        Ok(PipelineOutcome {
            job_id: job.id,
            status,
            counts,
            duplicates,
            stored,
        })
    }

    /// Supplied items win; otherwise scrape the source urls. An open
    /// scraper circuit degrades to an empty batch rather than failing
    /// the job.
    async fn acquire_items(&self, job: &IngestJob) -> Result<Vec<ContentItem>, AppError> {
        if !job.items.is_empty() {
            return Ok(job.items.clone());
        }
        if job.source_urls.is_empty() {
            return Ok(Vec::new());
        }

        match self
            .circuits
            .scraper()
            .call(|| self.scraper.scrape_urls(&job.source_urls))
            .await
        {
            Ok(items) => Ok(items),
            Err(CircuitBreakerError::Open { .. }) => {
                tracing::warn!(job_id = %job.id, "Scraper circuit open, proceeding with no items");
                Ok(Vec::new())
            }
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    /// Enriches one item into an [`Insight`].
    ///
    /// Analysis is skipped for spam and exact duplicates. An open
    /// analysis or extraction circuit substitutes the fallback result;
    /// an analysis or extraction error with a closed circuit fails the
    /// item.
    async fn process_item(
        &self,
        job: &IngestJob,
        item: &ContentItem,
        flags: &DedupFlags,
    ) -> Result<Insight, AppError> {
        let is_spam = self.spam.is_spam(&item.content);

        let analysis = if is_spam || flags.is_exact_duplicate {
            Analysis::empty()
        } else {
            match self
                .circuits
                .text_analysis()
                .call(|| self.analyzer.analyze(&item.content))
                .await
            {
                Ok(analysis) => analysis,
                Err(CircuitBreakerError::Open { .. }) => Analysis::fallback(),
                Err(CircuitBreakerError::Inner(e)) => return Err(e),
            }
        };

        let ocr_text = if item.media.is_empty() {
            None
        } else {
            let extracted = match self
                .circuits
                .text_extraction()
                .call(|| self.extractor.extract_text(&item.media))
                .await
            {
                Ok(extracted) => extracted,
                Err(CircuitBreakerError::Open { .. }) => ExtractedText::empty(),
                Err(CircuitBreakerError::Inner(e)) => return Err(e),
            };
            if extracted.text.is_empty() {
                None
            } else {
                Some(extracted.text)
            }
        };

        Ok(Insight {
            post_id: item.id.clone(),
            job_id: job.id,
            tenant: job.tenant.clone(),
            content_text: item.content.clone(),
            ocr_text,
            sentiment: analysis.sentiment.label.clone(),
            sentiment_score: analysis.sentiment.score,
            entities: analysis.entities,
            topics: analysis.topics,
            keywords: analysis.keywords,
            language: analysis.language.code,
            author: item.author.clone(),
            published_at: item.timestamp,
            provenance: Provenance {
                source_url: item.url.clone(),
                platform: item.platform.clone(),
                fetch_method: item.fetch_method.clone(),
                fetched_at: item.fetched_at,
                original_id: Some(item.id.clone()),
            },
            is_spam,
            is_duplicate: flags.is_duplicate,
            is_exact_duplicate: flags.is_exact_duplicate,
            is_near_duplicate: flags.is_near_duplicate,
            duplicate_of: flags.duplicate_of.clone(),
            created_at: chrono::Utc::now(),
        })
    }

    /// Publishes a job-level error event. Called by the worker when a
    /// run fails.
    pub async fn publish_error(&self, job: &IngestJob, error: &AppError) {
        self.emit(
            JobEvent::new(EventType::Error, job.id, &job.tenant)
                .with_data(json!({ "error": error.to_string() })),
        )
        .await;
    }

    async fn report(
        &self,
        job: &IngestJob,
        status: JobStatus,
        progress_percent: u8,
        counts: &ItemCounts,
    ) -> Result<(), AppError> {
        self.queue
            .update_progress(job.id, status, progress_percent, counts)
            .await
    }

    async fn emit_complete(
        &self,
        job: &IngestJob,
        status: JobStatus,
        counts: &ItemCounts,
        stored: u32,
    ) {
        self.emit(
            JobEvent::new(EventType::Complete, job.id, &job.tenant).with_data(json!({
                "status": status.as_str(),
                "items_total": counts.total,
                "succeeded": counts.succeeded,
                "failed": counts.failed,
                "stored": stored,
            })),
        )
        .await;
    }

    // Events are best effort. A sink outage never fails a job.
    async fn emit(&self, event: JobEvent) {
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(error = %e, "Failed to publish job event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::job::CreateIngestJobRequest;
    use crate::testutil::{
        make_test_item, MockAnalyzer, MockEventSink, MockInsightStore, MockJobQueue, MockScraper,
        MockTextExtractor,
    };

    type TestPipeline = IngestPipeline<
        MockJobQueue,
        MockAnalyzer,
        MockTextExtractor,
        MockScraper,
        MockInsightStore,
        MockEventSink,
    >;

    struct Fixture {
        queue: MockJobQueue,
        analyzer: MockAnalyzer,
        extractor: MockTextExtractor,
        scraper: MockScraper,
        store: MockInsightStore,
        events: MockEventSink,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                queue: MockJobQueue::new(),
                analyzer: MockAnalyzer::new(),
                extractor: MockTextExtractor::new(),
                scraper: MockScraper::new(),
                store: MockInsightStore::new(),
                events: MockEventSink::new(),
            }
        }

        fn pipeline(&self) -> TestPipeline {
            IngestPipeline::new(
                self.queue.clone(),
                self.analyzer.clone(),
                self.extractor.clone(),
                self.scraper.clone(),
                self.store.clone(),
                self.events.clone(),
            )
        }

        async fn submit(&self, request: CreateIngestJobRequest) -> IngestJob {
            self.queue.create_job(&request).await.unwrap()
        }
    }

    fn request_with_items(items: Vec<crate::models::ContentItem>) -> CreateIngestJobRequest {
        CreateIngestJobRequest::new("acme", "social").with_items(items)
    }

    #[tokio::test]
    async fn test_completed_job_with_supplied_items() {
        let fx = Fixture::new();
        let job = fx
            .submit(request_with_items(vec![
                make_test_item("a", "first post about rust programming"),
                make_test_item("b", "second post about cooking pasta dishes"),
            ]))
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.counts.succeeded, 2);
        assert_eq!(outcome.counts.failed, 0);
        assert_eq!(outcome.stored, 2);
        assert_eq!(fx.store.stored_count(), 2);

        let stored = fx.queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress_percent, 100);
    }

    #[tokio::test]
    async fn test_double_submission_returns_existing_job() {
        let fx = Fixture::new();
        let request = request_with_items(vec![make_test_item("a", "a post about model trains")]);

        let first = fx.submit(request.clone()).await;
        let second = fx.submit(request).await;

        assert_eq!(first.id, second.id);
        assert_eq!(fx.queue.job_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_when_some_items_fail() {
        let fx = Fixture::new();
        let mut fx = fx;
        fx.analyzer = MockAnalyzer::new().with_failure_on("broken");
        let job = fx
            .submit(request_with_items(vec![
                make_test_item("a", "a perfectly fine post about gardening"),
                make_test_item("b", "this one is broken beyond repair"),
            ]))
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Partial);
        assert_eq!(outcome.counts.succeeded, 1);
        assert_eq!(outcome.counts.failed, 1);
        assert_eq!(fx.store.stored_count(), 1);
    }

    #[tokio::test]
    async fn test_all_items_failed_is_job_failure() {
        let mut fx = Fixture::new();
        fx.analyzer = MockAnalyzer::new().with_failure();
        let job = fx
            .submit(request_with_items(vec![
                make_test_item("a", "some content here"),
                make_test_item("b", "other content there"),
            ]))
            .await;

        let result = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(fx.store.stored_count(), 0);
    }

    #[tokio::test]
    async fn test_scrapes_when_no_items_supplied() {
        let mut fx = Fixture::new();
        fx.scraper = MockScraper::new().with_items(vec![make_test_item(
            "scraped-1",
            "content discovered by the scraper",
        )]);
        let job = fx
            .submit(
                CreateIngestJobRequest::new("acme", "web")
                    .with_source_urls(vec!["https://example.com/feed".to_string()]),
            )
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.counts.total, 1);
        assert_eq!(fx.scraper.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_items_completes_immediately() {
        let fx = Fixture::new();
        // Scraper returns nothing for the url.
        let job = fx
            .submit(
                CreateIngestJobRequest::new("acme", "web")
                    .with_source_urls(vec!["https://example.com/empty".to_string()]),
            )
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.counts.total, 0);
        assert_eq!(fx.analyzer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicates_flagged_and_analysis_skipped() {
        let fx = Fixture::new();
        let job = fx
            .submit(request_with_items(vec![
                make_test_item("a", "identical content for duplicate detection"),
                make_test_item("b", "identical content for duplicate detection"),
            ]))
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.duplicates, 1);
        // Exact duplicates skip the analysis call.
        assert_eq!(fx.analyzer.call_count(), 1);

        let stored = fx.store.stored.lock().unwrap();
        let dup = stored.iter().find(|i| i.post_id == "b").unwrap();
        assert!(dup.is_exact_duplicate);
        assert_eq!(dup.duplicate_of.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_open_analysis_circuit_substitutes_fallback() {
        let mut fx = Fixture::new();
        fx.analyzer = MockAnalyzer::new().with_failure();
        let pipeline = fx.pipeline();

        // Trip the analysis breaker before the run.
        for _ in 0..5 {
            pipeline
                .circuits()
                .text_analysis()
                .record_failure(&AppError::Timeout(30));
        }
        assert_eq!(
            pipeline.circuits().text_analysis().state(),
            CircuitState::Open
        );

        let job = fx
            .submit(request_with_items(vec![make_test_item(
                "a",
                "content that would normally be analyzed",
            )]))
            .await;

        let outcome = pipeline
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        // Fallback substitution is degraded success, not failure.
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.counts.failed, 0);
        assert_eq!(fx.analyzer.call_count(), 0);

        let stored = fx.store.stored.lock().unwrap();
        assert_eq!(stored[0].topics, vec!["Uncategorized".to_string()]);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let fx = Fixture::new();
        let items: Vec<_> = (0..5)
            .map(|i| make_test_item(&format!("item-{i}"), &format!("unique content number {i} with more words")))
            .collect();
        let job = fx.submit(request_with_items(items)).await;

        fx.pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        let updates = fx.queue.progress_updates();
        assert!(!updates.is_empty());
        let mut last = 0u8;
        for (_, _, pct) in updates {
            assert!(pct >= last, "progress went backwards: {last} -> {pct}");
            last = pct;
        }
    }

    #[tokio::test]
    async fn test_cancelled_job_is_not_resurrected() {
        let fx = Fixture::new();
        let job = fx
            .submit(request_with_items(vec![make_test_item("a", "content")]))
            .await;
        assert!(fx.queue.cancel_job(job.id).await.unwrap());

        let result = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));

        let stored = fx.queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let fx = Fixture::new();
        let job = fx
            .submit(request_with_items(vec![make_test_item("a", "content")]))
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fx.pipeline().process_job(&job, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_spam_items_flagged_without_analysis() {
        let fx = Fixture::new();
        let job = fx
            .submit(request_with_items(vec![make_test_item(
                "a",
                "buy now and win free money today",
            )]))
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(fx.analyzer.call_count(), 0);
        assert!(fx.store.stored.lock().unwrap()[0].is_spam);
    }

    #[tokio::test]
    async fn test_media_triggers_text_extraction() {
        let fx = Fixture::new();
        let mut item = make_test_item("a", "post with a picture attached");
        item.media = vec!["https://example.com/photo.jpg".to_string()];
        let job = fx.submit(request_with_items(vec![item])).await;

        fx.pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.extractor.call_count(), 1);
        assert_eq!(
            fx.store.stored.lock().unwrap()[0].ocr_text.as_deref(),
            Some("text from image")
        );
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_item() {
        let mut fx = Fixture::new();
        fx.extractor = MockTextExtractor::new().with_failure();
        let mut with_media = make_test_item("a", "post with a picture attached");
        with_media.media = vec!["https://example.com/photo.jpg".to_string()];
        let job = fx
            .submit(request_with_items(vec![
                with_media,
                make_test_item("b", "plain text post with no attachments"),
            ]))
            .await;

        let outcome = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Partial);
        assert_eq!(outcome.counts.failed, 1);
        assert_eq!(outcome.counts.succeeded, 1);

        let stored = fx.store.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].post_id, "b");
    }

    #[tokio::test]
    async fn test_open_extraction_circuit_degrades_item() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline();

        for _ in 0..5 {
            pipeline
                .circuits()
                .text_extraction()
                .record_failure(&AppError::Timeout(30));
        }
        assert_eq!(
            pipeline.circuits().text_extraction().state(),
            CircuitState::Open
        );

        let mut item = make_test_item("a", "post with a picture attached");
        item.media = vec!["https://example.com/photo.jpg".to_string()];
        let job = fx.submit(request_with_items(vec![item])).await;

        let outcome = pipeline
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        // No OCR text, but the item still succeeds.
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.counts.failed, 0);
        assert_eq!(fx.extractor.call_count(), 0);
        assert!(fx.store.stored.lock().unwrap()[0].ocr_text.is_none());
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let fx = Fixture::new();
        let job = fx
            .submit(request_with_items(vec![make_test_item(
                "a",
                "content for the event ordering test",
            )]))
            .await;

        fx.pipeline()
            .process_job(&job, &CancellationToken::new())
            .await
            .unwrap();

        let types = fx.events.event_types();
        assert_eq!(
            types,
            vec!["processing.started", "nlp.completed", "complete"]
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut fx = Fixture::new();
        fx.store = MockInsightStore::new().with_failure();
        let job = fx
            .submit(request_with_items(vec![make_test_item("a", "content")]))
            .await;

        let result = fx
            .pipeline()
            .process_job(&job, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AppError::StoreError(_))));
    }

    #[test]
    fn test_progress_tracker_clamps() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.advance(10), 10);
        assert_eq!(tracker.advance(30), 30);
        assert_eq!(tracker.advance(20), 30);
        assert_eq!(tracker.advance(150), 100);
    }
}
