//! Extracted records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One extracted item: a JSON object of named fields.
///
/// A record doubles as the request for the next level, whose page is
/// read from its `url` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record holding only a `url` field.
    pub fn from_url(url: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.insert("url", Value::String(url.into()));
        record
    }

    /// The `url` field, when it is a string.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.get_str("url")
    }

    /// A field's raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A field's value when it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrowed field map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Owned field map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_record_url_accessor() {
        let record = Record::from_url("https://example.com/a");
        assert_eq!(record.url(), Some("https://example.com/a"));

        let mut record = Record::new();
        record.insert("url", json!(42));
        assert_eq!(record.url(), None);
    }

    #[test]
    fn test_record_serializes_as_plain_object() {
        let mut record = Record::from_url("https://example.com/a");
        record.insert("title", json!("Episode 1"));
        let value = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(
            value,
            json!({"url": "https://example.com/a", "title": "Episode 1"})
        );
    }
}
