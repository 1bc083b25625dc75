//! Description download over HTTP.

use std::time::Duration;

use crate::device::Description;
use crate::error::{DiscoveryError, Result};

/// Anything that can produce a parsed description for a location URL
pub trait DescriptionSource: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Description>;
}

/// Blocking HTTP fetcher for description documents
///
/// Must not be created or dropped from inside an async runtime.
#[derive(Debug, Clone)]
pub struct DescriptionFetcher {
    http_client: reqwest::blocking::Client,
}

impl DescriptionFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    /// Download a document, returning its body and content type
    pub fn fetch_text(&self, url: &str) -> Result<(String, String)> {
        let response = self.http_client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                DiscoveryError::Timeout
            } else if e.is_builder() {
                DiscoveryError::InvalidUrl(url.to_string())
            } else {
                DiscoveryError::NetworkError(format!("Failed to fetch {}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to read response body: {}", e)))?;

        Ok((body, content_type))
    }
}

impl DescriptionSource for DescriptionFetcher {
    fn fetch(&self, location: &str) -> Result<Description> {
        let (xml, _) = self.fetch_text(location)?;
        tracing::trace!(location, bytes = xml.len(), "fetched description");
        Description::parse(&xml, location)
    }
}
