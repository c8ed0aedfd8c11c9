//! JSON-file category store.
//!
//! Items are JSON objects identified by a string primary key and filed under
//! a fixed-depth category path (for example `["END", "3"]` for an event and a
//! page number). The whole store lives in one file:
//!
//! ```json
//! { "category": { "END": { "3": ["a.mp4"] } }, "data": [ { "name": "a.mp4" } ] }
//! ```
//!
//! Writes go to a temporary file that is then renamed over the store, and a
//! failed [`CategoryStore::set`] leaves the previous state in place.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::store::CategoryStore;
//! use serde_json::json;
//!
//! # fn example() -> harvester_core::store::Result<()> {
//! let mut store = CategoryStore::open("state", "download", &["event", "page"], "name")?;
//! let item = json!({ "name": "a.mp4", "url": "https://example.com/a.mp4" });
//! store.set(&["END", "3"], item.as_object().cloned().unwrap_or_default())?;
//! assert_eq!(store.get_by_category(&["END"])?.len(), 1);
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

pub use error::StoreError;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored item.
pub type Item = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum Node {
    Keys(Vec<String>),
    Branch(BTreeMap<String, Node>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    category: BTreeMap<String, Node>,
    #[serde(default)]
    data: Vec<Item>,
}

/// Category-indexed item store backed by one JSON file.
#[derive(Debug)]
pub struct CategoryStore {
    path: PathBuf,
    category_keys: Vec<String>,
    primary_key: String,
    document: Document,
}

impl CategoryStore {
    /// Opens `<dir>/<name>.json`, creating the directory and an empty store
    /// if needed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoCategoryKeys`] if `category_keys` is empty
    /// - [`StoreError::Io`] if the directory or file cannot be accessed
    /// - [`StoreError::Json`] if an existing file is corrupt
    #[instrument(level = "debug", skip(dir, category_keys), fields(dir = %dir.as_ref().display()))]
    pub fn open(
        dir: impl AsRef<Path>,
        name: &str,
        category_keys: &[&str],
        primary_key: &str,
    ) -> Result<Self> {
        if category_keys.is_empty() {
            return Err(StoreError::NoCategoryKeys);
        }
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let path = dir.join(format!("{}.json", name.trim_end_matches(".json")));

        let document = match fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::json(&path, e))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let store = Self {
            path,
            category_keys: category_keys.iter().map(ToString::to_string).collect(),
            primary_key: primary_key.to_string(),
            document,
        };
        store.write()?;
        debug!(path = %store.path.display(), items = store.len(), "store opened");
        Ok(store)
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.document.data.len()
    }

    /// True when the store holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.document.data.is_empty()
    }

    /// Files `item` under `category`, replacing any item with the same
    /// primary key (which also moves it out of its old category).
    ///
    /// # Errors
    ///
    /// - [`StoreError::MissingPrimaryKey`] if the item has no string key
    /// - [`StoreError::InvalidCategory`] if `category` does not have one
    ///   non-empty value per category key
    /// - [`StoreError::Io`] if the file cannot be written; the in-memory
    ///   state is rolled back
    pub fn set(&mut self, category: &[&str], item: Item) -> Result<()> {
        let key = item
            .get(&self.primary_key)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::MissingPrimaryKey {
                key: self.primary_key.clone(),
            })?
            .to_string();
        if category.len() != self.category_keys.len() {
            return Err(StoreError::invalid_category(format!(
                "expected {} values ({}), got {}",
                self.category_keys.len(),
                self.category_keys.join(", "),
                category.len()
            )));
        }
        self.check_values(category)?;

        let backup = self.document.clone();
        self.remove_entry(&key);
        insert_key(&mut self.document.category, category, &key);
        self.document.data.push(item);

        if let Err(error) = self.write() {
            warn!(path = %self.path.display(), error = %error, "store write failed; rolling back");
            self.document = backup;
            return Err(error);
        }
        Ok(())
    }

    /// The item with primary key `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.position(key).map(|index| &self.document.data[index])
    }

    /// True when an item with primary key `key` exists.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Removes the item with primary key `key` and prunes empty branches.
    ///
    /// Returns `false` when no such item existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be written.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if !self.remove_entry(key) {
            return Ok(false);
        }
        self.write()?;
        Ok(true)
    }

    /// Items filed under `category`, in insertion order.
    ///
    /// `category` may be shorter than the configured depth; the missing
    /// trailing levels match anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCategory`] if `category` is deeper than
    /// the store or contains an empty value.
    pub fn get_by_category(&self, category: &[&str]) -> Result<Vec<&Item>> {
        if category.len() > self.category_keys.len() {
            return Err(StoreError::invalid_category(format!(
                "store has {} levels, query has {}",
                self.category_keys.len(),
                category.len()
            )));
        }
        self.check_values(category)?;

        let mut keys = BTreeSet::new();
        let mut branch = &self.document.category;
        for (depth, value) in category.iter().enumerate() {
            match branch.get(*value) {
                None => return Ok(Vec::new()),
                Some(Node::Branch(next)) => branch = next,
                Some(Node::Keys(found)) => {
                    if depth + 1 == category.len() {
                        keys.extend(found.iter().map(String::as_str));
                    }
                    return Ok(self.items_for(&keys));
                }
            }
        }
        collect_keys(branch, &mut keys);
        Ok(self.items_for(&keys))
    }

    fn check_values(&self, category: &[&str]) -> Result<()> {
        if let Some(depth) = category.iter().position(|value| value.is_empty()) {
            return Err(StoreError::invalid_category(format!(
                "empty value for '{}'",
                self.category_keys[depth]
            )));
        }
        Ok(())
    }

    fn items_for(&self, keys: &BTreeSet<&str>) -> Vec<&Item> {
        self.document
            .data
            .iter()
            .filter(|item| {
                item.get(&self.primary_key)
                    .and_then(Value::as_str)
                    .is_some_and(|key| keys.contains(key))
            })
            .collect()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.document.data.iter().position(|item| {
            item.get(&self.primary_key).and_then(Value::as_str) == Some(key)
        })
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        self.document.data.remove(index);
        remove_key(&mut self.document.category, key);
        true
    }

    fn write(&self) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(&self.document).map_err(|e| StoreError::json(&self.path, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }
}

fn insert_key(branch: &mut BTreeMap<String, Node>, category: &[&str], key: &str) {
    let Some((value, rest)) = category.split_first() else {
        return;
    };
    if rest.is_empty() {
        let node = branch
            .entry((*value).to_string())
            .or_insert_with(|| Node::Keys(Vec::new()));
        if let Node::Branch(_) = node {
            *node = Node::Keys(Vec::new());
        }
        if let Node::Keys(keys) = node {
            if !keys.iter().any(|existing| existing == key) {
                keys.push(key.to_string());
            }
        }
        return;
    }
    let node = branch
        .entry((*value).to_string())
        .or_insert_with(|| Node::Branch(BTreeMap::new()));
    if let Node::Keys(_) = node {
        *node = Node::Branch(BTreeMap::new());
    }
    if let Node::Branch(next) = node {
        insert_key(next, rest, key);
    }
}

/// Removes `key` everywhere below `branch`, dropping nodes left empty.
fn remove_key(branch: &mut BTreeMap<String, Node>, key: &str) {
    branch.retain(|_, node| match node {
        Node::Keys(keys) => {
            keys.retain(|existing| existing != key);
            !keys.is_empty()
        }
        Node::Branch(next) => {
            remove_key(next, key);
            !next.is_empty()
        }
    });
}

fn collect_keys<'a>(branch: &'a BTreeMap<String, Node>, keys: &mut BTreeSet<&'a str>) {
    for node in branch.values() {
        match node {
            Node::Keys(found) => keys.extend(found.iter().map(String::as_str)),
            Node::Branch(next) => collect_keys(next, keys),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn item(name: &str, extra: i64) -> Item {
        json!({ "name": name, "extra": extra })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn store(dir: &TempDir) -> CategoryStore {
        CategoryStore::open(dir.path(), "download", &["event", "page"], "name").unwrap()
    }

    #[test]
    fn test_open_requires_category_keys() {
        let dir = TempDir::new().unwrap();
        let result = CategoryStore::open(dir.path(), "s", &[], "name");
        assert!(matches!(result, Err(StoreError::NoCategoryKeys)));
    }

    #[test]
    fn test_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.path().exists());
        assert_eq!(store.path(), dir.path().join("download.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_moves_item_between_categories() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.set(&["START", "1"], item("a.mp4", 1)).unwrap();
        store.set(&["END", "1"], item("a.mp4", 2)).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a.mp4").unwrap()["extra"], json!(2));
        assert!(store.get_by_category(&["START"]).unwrap().is_empty());
        assert_eq!(store.get_by_category(&["END", "1"]).unwrap().len(), 1);
        // the emptied START branch is pruned
        assert!(!store.document.category.contains_key("START"));
    }

    #[test]
    fn test_set_validates_item_and_category() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let nameless = json!({ "extra": 1 }).as_object().cloned().unwrap();
        assert!(matches!(
            store.set(&["END", "1"], nameless),
            Err(StoreError::MissingPrimaryKey { .. })
        ));
        assert!(matches!(
            store.set(&["END"], item("a", 1)),
            Err(StoreError::InvalidCategory { .. })
        ));
        assert!(matches!(
            store.set(&["END", ""], item("a", 1)),
            Err(StoreError::InvalidCategory { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_prunes_empty_branches() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.set(&["END", "1"], item("a", 1)).unwrap();
        store.set(&["END", "2"], item("b", 1)).unwrap();

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(!store.has("a"));
        assert_eq!(store.get_by_category(&["END"]).unwrap().len(), 1);

        assert!(store.remove("b").unwrap());
        assert!(store.document.category.is_empty());
    }

    #[test]
    fn test_get_by_category_wildcards_and_order() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.set(&["WRITE", "2"], item("c", 1)).unwrap();
        store.set(&["WRITE", "1"], item("a", 1)).unwrap();
        store.set(&["ERROR", "1"], item("b", 1)).unwrap();

        let names: Vec<&str> = store
            .get_by_category(&["WRITE"])
            .unwrap()
            .iter()
            .filter_map(|item| item["name"].as_str())
            .collect();
        assert_eq!(names, vec!["c", "a"]);
        assert_eq!(store.get_by_category(&[]).unwrap().len(), 3);
        assert!(store.get_by_category(&["ABORT"]).unwrap().is_empty());
        assert!(store.get_by_category(&["WRITE", "1", "x"]).is_err());
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = store(&dir);
            store.set(&["END", "1"], item("a", 7)).unwrap();
        }
        let store = store(&dir);
        assert_eq!(store.get("a").unwrap()["extra"], json!(7));
        assert_eq!(store.get_by_category(&["END", "1"]).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("download.json"), b"{not json").unwrap();
        let result = CategoryStore::open(dir.path(), "download", &["event"], "name");
        assert!(matches!(result, Err(StoreError::Json { .. })));
    }
}
