use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single piece of content flowing through the pipeline, either supplied
/// by the caller at submission or produced by the scraping collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub url: String,
    pub content: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// URLs of attached images, if any. Non-empty media triggers the
    /// image-text-extraction stage for this item.
    #[serde(default)]
    pub media: Vec<String>,
    pub platform: String,
    pub fetch_method: String,
    pub fetched_at: DateTime<Utc>,
}

/// Sentiment classification for a piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentiment {
    /// "positive", "negative", "neutral", or "unknown".
    pub label: String,
    pub score: f64,
    pub confidence: f64,
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self {
            label: "neutral".to_string(),
            score: 0.0,
            confidence: 0.0,
        }
    }
}

/// A named entity found in text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: String,
    pub name: String,
    pub confidence: f64,
}

/// Detected language of a piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
    pub confidence: f64,
}

impl Language {
    pub fn unknown() -> Self {
        Self {
            code: "unknown".to_string(),
            name: "Unknown".to_string(),
            confidence: 0.0,
        }
    }
}

/// Full output of the text-analysis collaborator for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub sentiment: Sentiment,
    pub entities: Vec<Entity>,
    pub topics: Vec<String>,
    pub keywords: Vec<String>,
    pub language: Language,
    /// Set when this result was substituted because the analysis
    /// dependency was unavailable (circuit open).
    #[serde(default)]
    pub fallback: bool,
}

impl Analysis {
    /// Neutral result for empty/whitespace input.
    pub fn empty() -> Self {
        Self {
            sentiment: Sentiment::neutral(),
            entities: Vec::new(),
            topics: Vec::new(),
            keywords: Vec::new(),
            language: Language::unknown(),
            fallback: false,
        }
    }

    /// Substitute result used when the analysis circuit is open.
    pub fn fallback() -> Self {
        Self {
            topics: vec!["Uncategorized".to_string()],
            fallback: true,
            ..Self::empty()
        }
    }
}

/// A region of recognized text within an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub confidence: f64,
    /// Bounding box as [x, y, width, height] in pixels.
    pub bbox: [f64; 4],
}

/// Output of the image-text-extraction collaborator for one item's media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub confidence: f64,
    pub regions: Vec<TextRegion>,
}

impl ExtractedText {
    /// Empty result, also used as the circuit-open fallback.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            regions: Vec::new(),
        }
    }
}

/// Where an insight came from and how it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source_url: String,
    pub platform: String,
    pub fetch_method: String,
    pub fetched_at: DateTime<Utc>,
    pub original_id: Option<String>,
}

/// Normalized, enriched record produced by the pipeline and handed to the
/// persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub post_id: String,
    pub job_id: Uuid,
    pub tenant: String,
    pub content_text: String,
    pub ocr_text: Option<String>,
    pub sentiment: String,
    pub sentiment_score: f64,
    pub entities: Vec<Entity>,
    pub topics: Vec<String>,
    pub keywords: Vec<String>,
    pub language: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub provenance: Provenance,
    pub is_spam: bool,
    pub is_duplicate: bool,
    pub is_exact_duplicate: bool,
    pub is_near_duplicate: bool,
    pub duplicate_of: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_analysis_is_neutral() {
        let a = Analysis::empty();
        assert_eq!(a.sentiment.label, "neutral");
        assert!(a.entities.is_empty());
        assert_eq!(a.language.code, "unknown");
        assert!(!a.fallback);
    }

    #[test]
    fn test_fallback_analysis_is_marked() {
        let a = Analysis::fallback();
        assert!(a.fallback);
        assert_eq!(a.topics, vec!["Uncategorized".to_string()]);
    }

    #[test]
    fn test_content_item_media_defaults_empty() {
        let json = r#"{
            "id": "p1",
            "url": "https://example.com/post/1",
            "content": "hello",
            "title": null,
            "author": null,
            "timestamp": null,
            "platform": "web",
            "fetch_method": "http",
            "fetched_at": "2026-01-01T00:00:00Z"
        }"#;
        let item: ContentItem = serde_json::from_str(json).unwrap();
        assert!(item.media.is_empty());
    }
}
