use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use sift_core::error::AppError;
use sift_core::models::ContentItem;
use sift_core::traits::Scraper;
use url::Url;

const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP client for the scraping service.
///
/// Source urls come straight from job submitters, so each one is
/// validated against SSRF before being forwarded. Urls are scraped one
/// at a time; a failing url is skipped, and the whole call fails only
/// when nothing could be scraped at all.
#[derive(Clone)]
pub struct HttpScraper {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
}

impl HttpScraper {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_SCRAPE_TIMEOUT)
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

    async fn scrape_one(&self, source_url: &str) -> Result<Vec<ContentItem>, AppError> {
        validate_url(source_url)?;

        let url = format!("{}/scrape", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ScrapeRequest { url: source_url })
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
            return Err(AppError::HttpError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<Vec<ContentItem>>()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse scrape response: {}", e)))
    }
}

impl Scraper for HttpScraper {
    async fn scrape_urls(&self, urls: &[String]) -> Result<Vec<ContentItem>, AppError> {
        let mut items = Vec::new();
        let mut last_error: Option<AppError> = None;
        let mut any_succeeded = false;

        for source_url in urls {
            match self.scrape_one(source_url).await {
                Ok(mut scraped) => {
                    any_succeeded = true;
                    items.append(&mut scraped);
                }
                Err(e) => {
                    tracing::warn!(url = %source_url, error = %e, "Scrape failed, skipping url");
                    last_error = Some(e);
                }
            }
        }

        if !any_succeeded && let Some(e) = last_error {
            return Err(e);
        }
        Ok(items)
    }
}

/// Rejects urls that could reach internal services (SSRF).
///
/// Only http/https ip-literal and hostname urls pass; private, loopback,
/// link-local, and otherwise reserved addresses are blocked. Hostname
/// resolution is left to the scraping service, which applies the same
/// check post-resolution.
fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ValidationError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::ValidationError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::ValidationError("URL has no host".to_string()))?;

    if let Ok(ip) = host.parse::<IpAddr>()
        && is_private_ip(ip)
    {
        return Err(AppError::ValidationError(format!(
            "SSRF blocked: {host} is a private/reserved IP"
        )));
    }

    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16, cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ips_detected() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("172.16.0.1".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
        assert!(is_private_ip("100.64.0.1".parse().unwrap()));
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_public_ips_allowed() {
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("1.1.1.1".parse().unwrap()));
        assert!(!is_private_ip("2606:4700:4700::1111".parse().unwrap()));
    }

    #[test]
    fn test_validate_url_rejects_bad_scheme() {
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn test_validate_url_rejects_private_targets() {
        assert!(validate_url("http://127.0.0.1:8080/admin").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data/").is_err());
    }

    #[test]
    fn test_validate_url_allows_public() {
        assert!(validate_url("https://example.com/feed").is_ok());
        assert!(validate_url("http://8.8.8.8/page").is_ok());
    }
}
