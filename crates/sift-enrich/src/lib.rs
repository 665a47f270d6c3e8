//! HTTP clients for Sift's enrichment collaborators: text analysis,
//! image text extraction, and scraping.

pub mod analyzer;
pub mod extractor;
pub mod scraper;

pub use analyzer::HttpAnalyzer;
pub use extractor::HttpTextExtractor;
pub use scraper::HttpScraper;
