//! Per-session cookie jar.
//!
//! Owned by a [`Session`](super::Session) and deep-copied when the session
//! forks, so sibling crawl branches never see each other's cookies. Storage
//! and RFC 6265 matching come from `cookie_store`, the store behind reqwest's
//! own cookie jar; `Domain` attributes naming a public suffix are screened
//! with the `psl` list before they reach it.

use std::fmt;

use cookie_store::{CookieStore, RawCookie};
use tracing::debug;
use url::Url;

/// Cookies collected by one browsing session.
///
/// Values are intentionally redacted in Debug output to prevent accidental
/// logging of sensitive cookie data.
#[derive(Clone, Default)]
pub struct CookieJar {
    store: CookieStore,
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.store
                    .iter_unexpired()
                    .map(|cookie| (cookie.name(), "[REDACTED]")),
            )
            .finish()
    }
}

impl CookieJar {
    /// Empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores every `Set-Cookie` value received from `url`.
    pub fn store_response<'a>(&mut self, url: &Url, headers: impl IntoIterator<Item = &'a str>) {
        for header in headers {
            self.insert(header, url);
        }
    }

    /// Stores one `Set-Cookie` value as if received from `url`.
    ///
    /// Returns false when the cookie was rejected: malformed, scoped to a
    /// domain `url` may not set, or scoped to a public suffix.
    pub fn insert(&mut self, set_cookie: &str, url: &Url) -> bool {
        let Ok(mut cookie) = RawCookie::parse(set_cookie) else {
            debug!(url = %url, "ignoring malformed Set-Cookie");
            return false;
        };

        if let Some(domain) = cookie.domain().map(|d| d.trim_start_matches('.').to_ascii_lowercase())
            && is_public_suffix(&domain)
        {
            let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
            if host != domain {
                debug!(host = %host, domain = %domain, "rejecting cookie for public suffix");
                return false;
            }
            // a public suffix may only set cookies for itself
            cookie.unset_domain();
        }

        match self.store.insert_raw(&cookie, url) {
            Ok(_) => true,
            Err(error) => {
                debug!(url = %url, error = %error, "cookie rejected");
                false
            }
        }
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    #[must_use]
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Value of the unexpired cookie called `name` that would be sent to `url`.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self, name: &str, url: &Url) -> Option<&str> {
        self.store
            .get_request_values(url)
            .find(|(cookie, _)| *cookie == name)
            .map(|(_, value)| value)
    }

    /// Number of unexpired cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.iter_unexpired().count()
    }

    /// True when no unexpired cookies are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_public_suffix(domain: &str) -> bool {
    psl::suffix_str(domain).is_some_and(|suffix| suffix.eq_ignore_ascii_case(domain))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn sorted(header: Option<String>) -> Vec<String> {
        let mut pairs: Vec<String> = header
            .unwrap_or_default()
            .split("; ")
            .filter(|pair| !pair.is_empty())
            .map(str::to_string)
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_header_for_matches_domain_path_and_secure() {
        let mut jar = CookieJar::new();
        let origin = url("https://www.example.com/");
        jar.store_response(
            &origin,
            [
                "site=1; Domain=example.com; Path=/",
                "deep=2; Path=/videos",
                "tls=3; Secure; Path=/",
            ],
        );
        assert_eq!(jar.len(), 3);

        let header = jar.header_for(&url("https://www.example.com/videos/1"));
        assert_eq!(sorted(header), ["deep=2", "site=1", "tls=3"]);

        let header = jar.header_for(&url("http://cdn.example.com/videos/1"));
        assert_eq!(sorted(header), ["site=1"]);

        assert!(jar.header_for(&url("https://www.example.com/videosx")).is_some_and(|h| !h.contains("deep")));
        assert!(jar.header_for(&url("https://example.org/")).is_none());
    }

    #[test]
    fn test_foreign_domain_is_rejected() {
        let mut jar = CookieJar::new();
        assert!(!jar.insert("a=1; Domain=other.com", &url("https://example.com/")));
        assert!(jar.is_empty());
    }

    #[test]
    fn test_public_suffix_domain_is_rejected() {
        let mut jar = CookieJar::new();
        let origin = url("https://a.example.com/");
        jar.store_response(&origin, ["track=1; Domain=com; Path=/"]);
        assert!(jar.header_for(&url("https://victim.com/")).is_none());
        assert!(jar.is_empty());

        assert!(!jar.insert("track=2; Domain=.co.uk; Path=/", &url("https://shop.example.co.uk/")));
        assert!(jar.header_for(&url("https://other.co.uk/")).is_none());
        assert!(jar.is_empty());
    }

    #[test]
    fn test_insert_replaces_and_expired_deletes() {
        let mut jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.store_response(&origin, ["a=1; Path=/"]);
        jar.store_response(&origin, ["a=2; Path=/"]);
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.value("a", &origin), Some("2"));

        jar.store_response(&origin, ["a=gone; Path=/; Max-Age=0"]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_past_expires_is_not_stored() {
        let mut jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.insert("old=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT", &origin);
        assert!(jar.header_for(&origin).is_none());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut parent = CookieJar::new();
        let origin = url("https://example.com/");
        parent.insert("root=1", &origin);

        let mut child = parent.clone();
        child.insert("branch=1", &origin);
        assert_eq!(child.len(), 2);
        assert_eq!(parent.len(), 1);
    }

    #[test]
    fn test_debug_redacts_value() {
        let mut jar = CookieJar::new();
        jar.insert("token=secret-value", &url("https://example.com/"));
        let debug = format!("{jar:?}");
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("token"));
    }
}
