//! HTTP client wrapper shared by page fetches and downloads.
//!
//! This module provides the `HttpClient` struct which issues ranged GET
//! requests with proper timeout configuration and error handling, and the
//! `build_client` helper the crawl session reuses for page fetches.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// Transport settings shared by every client the harvester builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, including body transfer.
    pub read_timeout: Duration,
    /// User-Agent override; the crate default identifies the tool.
    pub user_agent: Option<String>,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientSettings {
    /// Converts the configured headers, skipping (and logging) invalid entries.
    #[must_use]
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => warn!(header = %name, "skipping invalid header"),
            }
        }
        map
    }
}

/// HTTP client for ranged, streaming downloads.
///
/// Created once and cloned into every transfer, taking advantage of
/// connection pooling. Transparent decompression is disabled because byte
/// offsets must refer to the bytes on the wire.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_settings(&ClientSettings::default())
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error (e.g. TLS backend initialization).
    pub fn with_settings(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        let client = build_client(settings, false)?;
        Ok(Self { client })
    }

    /// Issues `GET url` with `Range: bytes=<boundary>-` plus per-task headers.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server returns a non-2xx status
    #[instrument(level = "debug", skip(self, headers), fields(url = %url))]
    pub async fn get_range(
        &self,
        url: &str,
        boundary: u64,
        headers: &BTreeMap<String, String>,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self
            .client
            .get(parsed)
            .header(RANGE, format!("bytes={boundary}-"));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        debug!(status = status.as_u16(), "response headers received");
        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Builds a reqwest client from shared settings.
///
/// Cookies are not stored by reqwest; the crawl session owns its jar so it
/// can be forked per branch.
pub(crate) fn build_client(
    settings: &ClientSettings,
    decompress: bool,
) -> Result<Client, reqwest::Error> {
    base_client_builder(settings, decompress).build()
}

fn base_client_builder(settings: &ClientSettings, decompress: bool) -> ClientBuilder {
    let user_agent = settings
        .user_agent
        .clone()
        .unwrap_or_else(user_agent::default_user_agent);
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.read_timeout)
        .gzip(decompress)
        .user_agent(user_agent)
        .default_headers(settings.header_map())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_header_map_skips_invalid_entries() {
        let mut settings = ClientSettings::default();
        settings
            .headers
            .insert("Accept-Language".to_string(), "en".to_string());
        settings
            .headers
            .insert("bad header".to_string(), "x".to_string());
        let map = settings.header_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("accept-language").unwrap(), "en");
    }

    #[tokio::test]
    async fn test_get_range_sends_range_and_task_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .and(header("range", "bytes=10-"))
            .and(header("x-token", "abc"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1_u8; 5]))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let mut headers = BTreeMap::new();
        headers.insert("x-token".to_string(), "abc".to_string());
        let response = client
            .get_range(&format!("{}/file.bin", server.uri()), 10, &headers)
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 206);
    }

    #[tokio::test]
    async fn test_get_range_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let result = client
            .get_range(&format!("{}/missing", server.uri()), 0, &BTreeMap::new())
            .await;
        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_range_rejects_invalid_url() {
        let client = HttpClient::new();
        let result = client.get_range("not a url", 0, &BTreeMap::new()).await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_default_settings_use_standard_timeouts() {
        let settings = ClientSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.read_timeout, Duration::from_secs(300));
        assert!(settings.user_agent.is_none());
    }
}
