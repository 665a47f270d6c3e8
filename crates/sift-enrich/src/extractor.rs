use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use sift_core::error::AppError;
use sift_core::models::ExtractedText;
use sift_core::traits::TextExtractor;

// OCR on remote images is slow; give the service room.
const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for the image-text-extraction (OCR) service.
///
/// `POST /extract` takes `{"media_urls": [...]}` and returns the combined
/// extracted text with per-region detail.
#[derive(Clone)]
pub struct HttpTextExtractor {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    media_urls: &'a [String],
}

impl HttpTextExtractor {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_EXTRACT_TIMEOUT)
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

impl TextExtractor for HttpTextExtractor {
    async fn extract_text(&self, media_urls: &[String]) -> Result<ExtractedText, AppError> {
        if media_urls.is_empty() {
            return Ok(ExtractedText::empty());
        }

        let url = format!("{}/extract", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ExtractRequest { media_urls })
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
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExtractionError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        response.json::<ExtractedText>().await.map_err(|e| {
            AppError::ExtractionError(format!("Failed to parse extraction response: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_media_skips_request() {
        let extractor = HttpTextExtractor::new("http://ocr.invalid").unwrap();
        let extracted = extractor.extract_text(&[]).await.unwrap();
        assert!(extracted.text.is_empty());
        assert!(extracted.regions.is_empty());
    }
}
