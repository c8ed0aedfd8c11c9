//! Turning fetched pages into records.
//!
//! [`Extractor`] is the seam; [`ExtractRules`] is the declarative CSS-selector
//! implementation used by configuration files. Any
//! `Fn(&Page, &Record) -> Result<Vec<Record>, ExtractError>` is an extractor too.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ExtractError;
use super::record::Record;
use super::session::Page;

/// Produces records from a page.
///
/// `base` is the request that led to the page; implementations should start
/// every record from a copy of it so downstream levels keep earlier fields.
pub trait Extractor: Send + Sync {
    /// Extracts records from `page`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] when the page cannot be processed.
    fn extract(&self, page: &Page, base: &Record) -> Result<Vec<Record>, ExtractError>;
}

impl<F> Extractor for F
where
    F: Fn(&Page, &Record) -> Result<Vec<Record>, ExtractError> + Send + Sync,
{
    fn extract(&self, page: &Page, base: &Record) -> Result<Vec<Record>, ExtractError> {
        self(page, base)
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum FieldSource {
    /// Element text, whitespace collapsed.
    Text,
    /// Inner HTML.
    Html,
    /// Raw attribute value.
    Attr {
        /// Attribute name.
        name: String,
    },
    /// Attribute resolved to an absolute URL against the page.
    Link {
        /// Attribute name, `href` unless set.
        #[serde(default = "default_link_attr")]
        attr: String,
    },
}

fn default_link_attr() -> String {
    "href".to_string()
}

/// One selector and the fields read from each element it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRule {
    /// CSS selector; every match yields one record.
    pub selector: String,
    /// Field name → source.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSource>,
}

/// Ordered selector rules for one crawl level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRules {
    /// Rules applied in order; their records are concatenated.
    #[serde(default)]
    pub rules: Vec<ExtractRule>,
}

impl ExtractRules {
    /// Checks that every selector parses.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidSelector`] for the first bad selector.
    pub fn validate(&self) -> Result<(), ExtractError> {
        for rule in &self.rules {
            parse_selector(&rule.selector)?;
        }
        Ok(())
    }
}

impl Extractor for ExtractRules {
    fn extract(&self, page: &Page, base: &Record) -> Result<Vec<Record>, ExtractError> {
        let document = Html::parse_document(&page.body);
        let mut records = Vec::new();
        for rule in &self.rules {
            let selector = parse_selector(&rule.selector)?;
            for element in document.select(&selector) {
                let mut record = base.clone();
                for (name, source) in &rule.fields {
                    record.insert(name.as_str(), field_value(element, source, page));
                }
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn field_value(element: ElementRef<'_>, source: &FieldSource, page: &Page) -> Value {
    match source {
        FieldSource::Text => {
            let text = element.text().collect::<Vec<_>>().join(" ");
            Value::String(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        FieldSource::Html => Value::String(element.inner_html()),
        FieldSource::Attr { name } => element
            .value()
            .attr(name)
            .map_or(Value::Null, |value| Value::String(value.to_string())),
        FieldSource::Link { attr } => element
            .value()
            .attr(attr)
            .and_then(|href| page.url.join(href.trim()).ok())
            .map_or(Value::Null, |url| Value::String(url.to_string())),
    }
}
