//! Browsing session: an HTTP client plus the state a browser tab carries.
//!
//! A session remembers its cookies and the last page it visited (for
//! `Referer` and relative link resolution). [`Session::fork`] deep-copies
//! that state, so recursive crawl branches start from their parent's context
//! without sharing it.

use std::sync::Arc;

use reqwest::Client;
use reqwest::header::{COOKIE, REFERER, SET_COOKIE};
use tracing::{debug, instrument};
use url::Url;

use super::cookies::CookieJar;
use super::error::{CrawlError, FetchError};
use super::extract::Extractor;
use super::record::Record;
use crate::download::{ClientSettings, build_client};

/// A fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Final URL after redirects; relative links resolve against it.
    pub url: Url,
    /// Response body as text.
    pub body: Arc<str>,
}

/// Cookie jar plus last-page context over a shared HTTP connection pool.
#[derive(Debug)]
pub struct Session {
    client: Client,
    cookies: CookieJar,
    last_page: Option<Page>,
}

impl Session {
    /// Creates a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(settings: &ClientSettings) -> Result<Self, FetchError> {
        let client = build_client(settings, true).map_err(|source| FetchError::Client { source })?;
        Ok(Self::with_client(client))
    }

    /// Creates a session over an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            cookies: CookieJar::new(),
            last_page: None,
        }
    }

    /// Independent copy: same connection pool, cloned cookies and last page.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            client: self.client.clone(),
            cookies: self.cookies.clone(),
            last_page: self.last_page.clone(),
        }
    }

    /// Resolves `href` against the last fetched page.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if `href` is neither absolute nor
    /// resolvable.
    pub fn resolve(&self, href: &str) -> Result<Url, FetchError> {
        match Url::parse(href) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .last_page
                .as_ref()
                .and_then(|page| page.url.join(href).ok())
                .ok_or_else(|| FetchError::invalid_url(href)),
            Err(_) => Err(FetchError::invalid_url(href)),
        }
    }

    /// Fetches a page, sending this session's cookies and `Referer`.
    ///
    /// Cookies set by the response are stored even when the status is an error.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` on invalid URLs, network failures, or non-2xx statuses.
    #[instrument(level = "debug", skip(self), fields(url = %href))]
    pub async fn fetch(&mut self, href: &str) -> Result<Page, FetchError> {
        let target = self.resolve(href)?;
        let mut request = self.client.get(target.clone());
        if let Some(cookie) = self.cookies.header_for(&target) {
            request = request.header(COOKIE, cookie);
        }
        if let Some(last) = &self.last_page {
            request = request.header(REFERER, last.url.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::network(target.as_str(), e))?;

        let final_url = response.url().clone();
        self.cookies.store_response(
            &final_url,
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(target.as_str(), status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(target.as_str(), e))?;
        debug!(status = status.as_u16(), bytes = body.len(), "page fetched");

        let page = Page {
            url: final_url,
            body: Arc::from(body),
        };
        self.last_page = Some(page.clone());
        Ok(page)
    }

    /// Fetches `request.url` and extracts records, each merged over `request`.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Fetch`] or [`CrawlError::Extraction`].
    pub async fn dig(
        &mut self,
        request: &Record,
        extractor: &dyn Extractor,
    ) -> Result<Vec<Record>, CrawlError> {
        let href = request
            .url()
            .ok_or_else(|| FetchError::invalid_url("<record without url>"))?;
        let page = self.fetch(href).await?;
        let records = extractor.extract(&page, request)?;
        debug!(url = %page.url, records = records.len(), "records extracted");
        Ok(records)
    }

    /// Cookies collected so far.
    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Mutable access to the cookie jar, e.g. to seed a login cookie.
    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// The last successfully fetched page.
    #[must_use]
    pub fn last_page(&self) -> Option<&Page> {
        self.last_page.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn session() -> Session {
        Session::new(&ClientSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_stores_cookies_and_sends_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "sid=42; Path=/")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/next"))
            .and(header("cookie", "sid=42"))
            .and(header("referer", format!("{}/login", server.uri()).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session();
        session.fetch(&format!("{}/login", server.uri())).await.unwrap();
        let page = session.fetch("/next").await.unwrap();
        assert_eq!(&*page.body, "ok");
        assert_eq!(session.cookies().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut session = session();
        let result = session.fetch(&format!("{}/boom", server.uri())).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 500, .. })
        ));
        assert!(session.last_page().is_none());
    }

    #[test]
    fn test_resolve_relative_without_page_fails() {
        let session = session();
        assert!(matches!(
            session.resolve("/relative"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(session.resolve("https://example.com/a").is_ok());
    }

    #[tokio::test]
    async fn test_fork_is_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "branch=a"))
            .mount(&server)
            .await;

        let parent = session();
        let mut child = parent.fork();
        child.fetch(&format!("{}/a", server.uri())).await.unwrap();
        assert_eq!(child.cookies().len(), 1);
        assert!(parent.cookies().is_empty());
        assert!(parent.last_page().is_none());

        let grandchild = child.fork();
        assert_eq!(grandchild.cookies().len(), 1);
        assert_eq!(grandchild.last_page(), child.last_page());
    }
}
