//! Error types for the crawl module.

use thiserror::Error;

use super::hooks::DigEvent;

/// Errors surfaced by level controllers and the crawl orchestrator.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Chain construction failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// An orchestrator needs at least one level.
    #[error("crawl needs at least one level")]
    EmptyChain,

    /// A page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A fetched page could not be turned into records.
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// A hook failed and escalation could not absorb it.
    #[error("{event} hook failed: {error:#}")]
    Hook {
        /// Event whose notification failed.
        event: DigEvent,
        /// Error returned by the hook.
        error: anyhow::Error,
    },
}

impl CrawlError {
    /// Creates a hook failure error.
    pub fn hook(event: DigEvent, error: anyhow::Error) -> Self {
        Self::Hook { event, error }
    }
}

/// Errors from [`LevelController::link`](super::LevelController::link).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The node to append is already part of another chain.
    #[error("level {depth} already has a previous level")]
    AlreadyHasPrevious {
        /// Depth of the node that was rejected.
        depth: usize,
    },

    /// This node already links to a next level.
    #[error("level {depth} already has a next level")]
    AlreadyHasNext {
        /// Depth of the node that was rejected.
        depth: usize,
    },

    /// The link would make the chain circular.
    #[error("linking would create a cycle")]
    Cycle,
}

/// Page fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request URL (or a relative link against the last page) is invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, body read).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a network error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }
}

/// Record extraction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// A CSS selector did not parse.
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector {
        /// The selector text.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// A custom extractor gave up on the page.
    #[error("extraction failed: {reason}")]
    Failed {
        /// Why extraction failed.
        reason: String,
    },
}

impl ExtractError {
    /// Creates a custom extraction failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let error = LinkError::AlreadyHasPrevious { depth: 2 };
        assert_eq!(error.to_string(), "level 2 already has a previous level");
        assert_eq!(
            CrawlError::from(LinkError::Cycle).to_string(),
            "linking would create a cycle"
        );
    }

    #[test]
    fn test_fetch_error_http_status_display() {
        let error = FetchError::http_status("https://example.com/list", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected status in: {msg}");
        assert!(msg.contains("https://example.com/list"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_extract_error_invalid_selector_display() {
        let error = ExtractError::InvalidSelector {
            selector: "a[".to_string(),
            reason: "unexpected end".to_string(),
        };
        assert!(error.to_string().contains("\"a[\""));
    }

    #[test]
    fn test_crawl_error_hook_display() {
        let error = CrawlError::hook(DigEvent::Error, anyhow::anyhow!("sink closed"));
        assert_eq!(error.to_string(), "DIG_ERROR hook failed: sink closed");
    }
}
