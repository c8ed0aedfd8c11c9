//! Error types for the category store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from [`CategoryStore`](super::CategoryStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store needs at least one category level.
    #[error("category store needs at least one category key")]
    NoCategoryKeys,

    /// The item lacks a string value under the primary key.
    #[error("item is missing string primary key '{key}'")]
    MissingPrimaryKey {
        /// Name of the primary key field.
        key: String,
    },

    /// The category path does not fit the configured category keys.
    #[error("invalid category: {reason}")]
    InvalidCategory {
        /// What was wrong with the path.
        reason: String,
    },

    /// Reading or writing the backing file failed.
    #[error("store I/O failed for {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a valid store document.
    #[error("store file {path} is not valid JSON: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Creates an invalid-category error.
    #[must_use]
    pub fn invalid_category(reason: impl Into<String>) -> Self {
        Self::InvalidCategory {
            reason: reason.into(),
        }
    }

    /// Creates an I/O error for `path`.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a JSON error for `path`.
    #[must_use]
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let error = StoreError::MissingPrimaryKey {
            key: "url".to_string(),
        };
        assert_eq!(error.to_string(), "item is missing string primary key 'url'");

        let error = StoreError::invalid_category("expected 2 values, got 3");
        assert!(error.to_string().contains("expected 2 values"));

        let error = StoreError::io(
            "/tmp/state.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/state.json"));
    }
}
