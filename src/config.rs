//! Harvest configuration loaded from TOML.
//!
//! ```toml
//! target = "https://example.com/list"
//! output_dir = "downloads"
//! state_dir = "state"
//! name_field = "title"
//!
//! [scheduler]
//! max = 3
//! doing_max = 2
//! interval_ms = 1000
//!
//! [download]
//! chunk_threshold = 33554432
//! extensions = "^(mp4|mkv)$"
//!
//! [[levels]]
//! [[levels.rules]]
//! selector = "a.show"
//! fields = { url = { from = "link" } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::crawl::{ExtractRules, Extractor};
use crate::download::{
    CONNECT_TIMEOUT_SECS, ClientSettings, DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_SIZE,
    DownloadOptions, READ_TIMEOUT_SECS,
};
use crate::scheduler::{DEFAULT_DOING_MAX, DEFAULT_INTERVAL, DEFAULT_MAX, SchedulerOptions};

/// Default delay before a download is resubmitted after a capacity rejection.
pub const DEFAULT_CAPACITY_RETRY_MS: u64 = 1000;

/// Top-level harvest configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestConfig {
    /// Root page of the crawl.
    pub target: String,
    /// Where downloads are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Where the category stores are kept.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Record field used as the download file name.
    #[serde(default = "default_name_field")]
    pub name_field: String,
    /// Log sibling progress after each branch.
    #[serde(default = "default_log_over")]
    pub log_over: bool,
    /// Delay between resubmissions when the scheduler is full.
    #[serde(default = "default_capacity_retry_ms")]
    pub capacity_retry_ms: u64,
    /// Scheduler bounds.
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Download policy.
    #[serde(default)]
    pub download: DownloadSection,
    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpSection,
    /// Extraction rules, one entry per crawl level.
    #[serde(default)]
    pub levels: Vec<ExtractRules>,
}

/// `[scheduler]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    /// Waiting plus in-flight tasks.
    pub max: usize,
    /// Concurrent transfers.
    pub doing_max: usize,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX,
            doing_max: DEFAULT_DOING_MAX,
            interval_ms: u64::try_from(DEFAULT_INTERVAL.as_millis()).unwrap_or(1000),
        }
    }
}

/// `[download]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadSection {
    /// Chunk size in bytes.
    pub chunk_threshold: u64,
    /// Largest accepted resource in bytes; `0` disables the limit.
    pub max_size: u64,
    /// Regex the inferred extension must match.
    pub extensions: Option<String>,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_size: DEFAULT_MAX_SIZE,
            extensions: None,
        }
    }
}

/// `[http]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds.
    pub read_timeout_secs: u64,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_name_field() -> String {
    "name".to_string()
}

fn default_log_over() -> bool {
    true
}

fn default_capacity_retry_ms() -> u64 {
    DEFAULT_CAPACITY_RETRY_MS
}

impl HarvestConfig {
    /// Reads, parses, and validates a config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid TOML for this schema,
    /// or holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parses and validates config text.
    ///
    /// # Errors
    ///
    /// Fails on TOML errors or out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value with its expected range.
    pub fn validate(&self) -> Result<()> {
        match Url::parse(&self.target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => bail!(
                "Invalid config value for `target`: {}. Expected an absolute http(s) URL",
                self.target
            ),
        }
        if self.name_field.trim().is_empty() {
            bail!("Invalid config value for `name_field`: must not be empty");
        }
        if !(1..=60_000).contains(&self.capacity_retry_ms) {
            bail!(
                "Invalid config value for `capacity_retry_ms`: {}. Expected range: 1..=60000",
                self.capacity_retry_ms
            );
        }

        let scheduler = &self.scheduler;
        if !(1..=1000).contains(&scheduler.max) {
            bail!(
                "Invalid config value for `scheduler.max`: {}. Expected range: 1..=1000",
                scheduler.max
            );
        }
        if !(1..=scheduler.max).contains(&scheduler.doing_max) {
            bail!(
                "Invalid config value for `scheduler.doing_max`: {}. Expected range: 1..={}",
                scheduler.doing_max,
                scheduler.max
            );
        }
        if !(1..=60_000).contains(&scheduler.interval_ms) {
            bail!(
                "Invalid config value for `scheduler.interval_ms`: {}. Expected range: 1..=60000",
                scheduler.interval_ms
            );
        }

        if self.download.chunk_threshold == 0 {
            bail!("Invalid config value for `download.chunk_threshold`: 0. Expected at least 1");
        }
        if let Some(pattern) = &self.download.extensions {
            Regex::new(pattern)
                .with_context(|| format!("Invalid config value for `download.extensions`: {pattern}"))?;
        }

        validate_timeout_secs("http.connect_timeout_secs", self.http.connect_timeout_secs)?;
        validate_timeout_secs("http.read_timeout_secs", self.http.read_timeout_secs)?;

        if self.levels.is_empty() {
            bail!("Invalid config: at least one `[[levels]]` entry is required");
        }
        for (index, level) in self.levels.iter().enumerate() {
            level
                .validate()
                .with_context(|| format!("Invalid extraction rules for level {}", index + 1))?;
        }
        Ok(())
    }

    /// Scheduler bounds as options.
    ///
    /// # Errors
    ///
    /// Fails if the bounds are inconsistent.
    pub fn scheduler_options(&self) -> Result<SchedulerOptions> {
        Ok(SchedulerOptions::new(
            self.scheduler.max,
            self.scheduler.doing_max,
            Duration::from_millis(self.scheduler.interval_ms),
        )?)
    }

    /// Download policy as options.
    ///
    /// # Errors
    ///
    /// Fails if the extension pattern does not compile.
    pub fn download_options(&self) -> Result<DownloadOptions> {
        let extensions = self
            .download
            .extensions
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid `download.extensions` pattern")?;
        Ok(DownloadOptions {
            chunk_threshold: self.download.chunk_threshold,
            max_size: (self.download.max_size > 0).then_some(self.download.max_size),
            extensions,
            size_filter: None,
        })
    }

    /// HTTP transport settings.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.http.read_timeout_secs),
            user_agent: self.http.user_agent.clone(),
            headers: self.http.headers.clone(),
        }
    }

    /// One extractor per configured level.
    #[must_use]
    pub fn extractors(&self) -> Vec<Arc<dyn Extractor>> {
        self.levels
            .iter()
            .map(|rules| Arc::new(rules.clone()) as Arc<dyn Extractor>)
            .collect()
    }

    /// Capacity retry delay.
    #[must_use]
    pub fn capacity_retry(&self) -> Duration {
        Duration::from_millis(self.capacity_retry_ms)
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<()> {
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        target = "https://example.com/list"

        [[levels]]
        [[levels.rules]]
        selector = "a.show"
        fields = { url = { from = "link" } }
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = HarvestConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("downloads"));
        assert_eq!(config.state_dir, PathBuf::from("state"));
        assert_eq!(config.name_field, "name");
        assert!(config.log_over);
        assert_eq!(config.capacity_retry(), Duration::from_secs(1));

        let options = config.scheduler_options().unwrap();
        assert_eq!(options.max(), 3);
        assert_eq!(options.doing_max(), 2);
        assert_eq!(options.interval(), Duration::from_millis(1000));

        let download = config.download_options().unwrap();
        assert_eq!(download.chunk_threshold, 32 * 1024 * 1024);
        assert_eq!(download.max_size, Some(256 * 1024 * 1024));

        let http = config.client_settings();
        assert_eq!(http.connect_timeout, Duration::from_secs(30));
        assert_eq!(http.read_timeout, Duration::from_secs(300));
        assert_eq!(config.extractors().len(), 1);
    }

    #[test]
    fn test_full_config_parses() {
        let raw = r#"
            target = "https://example.com/list"
            output_dir = "/data/videos"
            name_field = "title"
            log_over = false

            [scheduler]
            max = 10
            doing_max = 4
            interval_ms = 250

            [download]
            chunk_threshold = 1000
            max_size = 0
            extensions = "^(mp4|mkv)$"

            [http]
            user_agent = "custom/1.0"
            headers = { "accept-language" = "en" }

            [[levels]]
            [[levels.rules]]
            selector = "a.show"
            fields = { url = { from = "link" } }

            [[levels]]
            [[levels.rules]]
            selector = "video source"
            fields = { url = { from = "link", attr = "src" }, title = { from = "text" } }
        "#;
        let config = HarvestConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.levels.len(), 2);
        assert!(!config.log_over);

        let download = config.download_options().unwrap();
        assert_eq!(download.max_size, None);
        assert!(download.extensions.unwrap().is_match("mkv"));
        assert_eq!(config.client_settings().headers["accept-language"], "en");
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let cases = [
            ("target = \"ftp://example.com\"", "target"),
            ("[scheduler]\nmax = 2\ndoing_max = 3", "scheduler.doing_max"),
            ("[scheduler]\ninterval_ms = 0", "scheduler.interval_ms"),
            ("[download]\nchunk_threshold = 0", "download.chunk_threshold"),
            ("[http]\nread_timeout_secs = 0", "http.read_timeout_secs"),
        ];
        for (fragment, field) in cases {
            let raw = if fragment.starts_with("target") {
                format!("{fragment}\n[[levels]]\n")
            } else {
                format!("target = \"https://example.com\"\n{fragment}\n[[levels]]\n")
            };
            let error = HarvestConfig::from_toml_str(&raw).unwrap_err();
            assert!(
                format!("{error:#}").contains(field),
                "expected error about {field}, got {error:#}"
            );
        }
    }

    #[test]
    fn test_levels_are_required() {
        let error = HarvestConfig::from_toml_str("target = \"https://example.com\"").unwrap_err();
        assert!(error.to_string().contains("levels"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let raw = format!("bogus = 1\n{MINIMAL}");
        assert!(HarvestConfig::from_toml_str(&raw).is_err());
    }
}
