use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use sift_core::error::AppError;
use sift_core::models::Analysis;
use sift_core::traits::TextAnalyzer;

const DEFAULT_ANALYZE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the text-analysis service.
///
/// The service exposes `POST /analyze` taking `{"text": ...}` and
/// returning the full analysis payload (sentiment, entities, topics,
/// keywords, language).
#[derive(Clone)]
pub struct HttpAnalyzer {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

impl HttpAnalyzer {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_ANALYZE_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl TextAnalyzer for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis, AppError> {
        // Nothing to analyze; skip the round trip.
        if text.trim().is_empty() {
            return Ok(Analysis::empty());
        }

        let url = format!("{}/analyze", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            return Err(AppError::AnalysisError {
                message: format!("HTTP {}: {}", status_code, body),
                status_code,
                retryable: status_code >= 500,
            });
        }

        response
            .json::<Analysis>()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse analysis response: {}", e)))
    }
}
