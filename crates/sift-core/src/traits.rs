use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Analysis, ContentItem, ExtractedText, Insight};

/// Text-analysis collaborator (sentiment, entities, topics, keywords,
/// language). Implementations must tolerate empty/whitespace input by
/// returning [`Analysis::empty`] rather than an error.
pub trait TextAnalyzer: Send + Sync + Clone {
    fn analyze(&self, text: &str) -> impl Future<Output = Result<Analysis, AppError>> + Send;
}

/// Image-text-extraction collaborator (OCR).
pub trait TextExtractor: Send + Sync + Clone {
    fn extract_text(
        &self,
        media_urls: &[String],
    ) -> impl Future<Output = Result<ExtractedText, AppError>> + Send;
}

/// Scraping collaborator that turns source URLs into content items.
pub trait Scraper: Send + Sync + Clone {
    fn scrape_urls(
        &self,
        urls: &[String],
    ) -> impl Future<Output = Result<Vec<ContentItem>, AppError>> + Send;
}

/// Persists normalized insights produced by the pipeline.
pub trait InsightStore: Send + Sync + Clone {
    /// Store a batch of insights for a job. Returns the number stored.
    fn store_batch(
        &self,
        job_id: Uuid,
        insights: &[Insight],
    ) -> impl Future<Output = Result<u32, AppError>> + Send;
}

/// Classifies content as spam.
pub trait SpamClassifier: Send + Sync + Clone {
    fn is_spam(&self, content: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Default / no-op implementations
// ---------------------------------------------------------------------------

/// Analyzer that returns the neutral structure for every input.
///
/// Used when text analysis is disabled by configuration, and as the capability
/// stand-in in tests that only exercise pipeline mechanics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalyzer;

impl TextAnalyzer for NoopAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<Analysis, AppError> {
        Ok(Analysis::empty())
    }
}

/// Extractor that returns an empty result for every input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTextExtractor;

impl TextExtractor for NoopTextExtractor {
    async fn extract_text(&self, _media_urls: &[String]) -> Result<ExtractedText, AppError> {
        Ok(ExtractedText::empty())
    }
}

/// Scraper that returns no items.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScraper;

impl Scraper for NoopScraper {
    async fn scrape_urls(&self, _urls: &[String]) -> Result<Vec<ContentItem>, AppError> {
        Ok(Vec::new())
    }
}

/// A no-op InsightStore for use when persistence is not needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInsightStore;

impl InsightStore for NullInsightStore {
    async fn store_batch(&self, _job_id: Uuid, insights: &[Insight]) -> Result<u32, AppError> {
        Ok(insights.len() as u32)
    }
}

/// Rule-based spam classifier: flags content containing any of a fixed
/// list of spam indicator phrases (case-insensitive).
#[derive(Debug, Clone)]
pub struct KeywordSpamClassifier {
    indicators: Vec<String>,
}

impl Default for KeywordSpamClassifier {
    fn default() -> Self {
        Self {
            indicators: [
                "buy now",
                "click here",
                "limited offer",
                "act now",
                "free money",
                "winner",
                "congratulations",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl KeywordSpamClassifier {
    pub fn with_indicators(indicators: Vec<String>) -> Self {
        Self {
            indicators: indicators.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

impl SpamClassifier for KeywordSpamClassifier {
    fn is_spam(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.indicators.iter().any(|i| lower.contains(i.as_str()))
    }
}
