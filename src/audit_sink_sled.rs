//! Embedded blob-store sink backed by sled.
//!
//! Records live in one sled tree, keyed by the rendered storage key. Inserts
//! use compare-and-swap against an absent value, so the first writer of a key
//! wins and later writers either match it byte for byte or get a conflict.

use std::fmt;
use std::path::Path;

use crate::audit_sink::{AbandonFlag, AuditSink, SinkReference};
use crate::errors::StorageError;
use crate::path_resolver::StorageKey;

pub const SLED_SCHEME: &str = "sled://";
pub const DEFAULT_TREE: &str = "audit";

#[derive(Clone)]
pub struct SledSink {
    tree: sled::Tree,
    tree_name: String,
}

impl fmt::Debug for SledSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SledSink")
            .field("tree_name", &self.tree_name)
            .finish_non_exhaustive()
    }
}

impl SledSink {
    /// Opens (or creates) the database at `path` and the named tree in it.
    pub fn open(path: impl AsRef<Path>, tree_name: &str) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| StorageError::database("opening audit database", e))?;
        Self::from_db(&db, tree_name)
    }

    /// Uses a tree of an already opened database.
    pub fn from_db(db: &sled::Db, tree_name: &str) -> Result<Self, StorageError> {
        let tree = db
            .open_tree(tree_name)
            .map_err(|e| StorageError::database("opening audit tree", e))?;
        Ok(Self {
            tree,
            tree_name: tree_name.to_string(),
        })
    }

    pub fn tree_name(&self) -> &str {
        &self.tree_name
    }

    /// Number of records in the tree.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn prefix(&self) -> String {
        format!("{SLED_SCHEME}{}/", self.tree_name)
    }

    /// Read a record by the reference `store` returned.
    pub async fn fetch(&self, reference: &SinkReference) -> Result<Vec<u8>, StorageError> {
        let prefix = self.prefix();
        let key = reference
            .as_str()
            .strip_prefix(prefix.as_str())
            .ok_or_else(|| StorageError::invalid_reference(reference.as_str()))?;
        self.fetch_key(key).await
    }

    /// Read a record by its rendered storage key.
    pub async fn fetch_key(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let tree = self.tree.clone();
        let key_name = key.to_string();
        let found = tokio::task::spawn_blocking(move || tree.get(key_name.as_bytes()))
            .await
            .map_err(|_| StorageError::join("sled sink read"))?
            .map_err(|e| StorageError::database("reading audit record", e))?;
        match found {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(StorageError::not_found(key)),
        }
    }
}

impl AuditSink for SledSink {
    fn reference_for(&self, key: &StorageKey) -> SinkReference {
        SinkReference::new(format!("{}{}", self.prefix(), key.as_str()))
    }

    async fn store(&self, key: &StorageKey, data: &[u8]) -> Result<SinkReference, StorageError> {
        let tree = self.tree.clone();
        let key_name = key.to_string();
        let bytes = data.to_vec();
        let abandon = AbandonFlag::new();
        let on_drop = abandon.on_drop();

        tokio::task::spawn_blocking(move || insert_once(&tree, &key_name, bytes, &abandon))
            .await
            .map_err(|_| StorageError::join("sled sink write"))??;
        on_drop.disarm();

        Ok(self.reference_for(key))
    }
}

fn insert_once(
    tree: &sled::Tree,
    key: &str,
    data: Vec<u8>,
    abandon: &AbandonFlag,
) -> Result<(), StorageError> {
    if abandon.is_set() {
        return Err(StorageError::abandoned(key));
    }

    let swapped = tree
        .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(data.as_slice()))
        .map_err(|e| StorageError::database("inserting audit record", e))?;

    if let Err(existing) = swapped {
        match existing.current {
            Some(current) if &*current == data.as_slice() => {
                tracing::debug!(key = key, "identical record already stored");
            }
            _ => return Err(StorageError::conflict(key)),
        }
    }

    tree.flush()
        .map_err(|e| StorageError::database("flushing audit tree", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn key(disambiguator: &str) -> StorageKey {
        let when = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        StorageKey::new("Package", "foo/1.0.0", when, disambiguator)
    }

    #[tokio::test]
    async fn store_then_fetch() {
        let tmp = TempDir::new().unwrap();
        let sink = SledSink::open(tmp.path(), DEFAULT_TREE).unwrap();
        let key = key("abc");

        let reference = sink.store(&key, b"payload").await.unwrap();
        assert_eq!(
            reference.as_str(),
            "sled://audit/Package/foo/1.0.0-20240101000000-abc"
        );
        assert_eq!(sink.fetch(&reference).await.unwrap(), b"payload");
        assert_eq!(sink.fetch_key(key.as_str()).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn identical_retry_keeps_one_record() {
        let tmp = TempDir::new().unwrap();
        let sink = SledSink::open(tmp.path(), DEFAULT_TREE).unwrap();
        let key = key("retry");

        let first = sink.store(&key, b"same").await.unwrap();
        let second = sink.store(&key, b"same").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_write_keeps_original() {
        let tmp = TempDir::new().unwrap();
        let sink = SledSink::open(tmp.path(), DEFAULT_TREE).unwrap();
        let key = key("clash");

        sink.store(&key, b"original").await.unwrap();
        let err = sink.store(&key, b"tampered").await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(sink.fetch_key(key.as_str()).await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn reference_from_other_tree_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let sink = SledSink::open(tmp.path(), "primary").unwrap();
        let reference = SinkReference::new("sled://secondary/Package/x");
        assert!(matches!(
            sink.fetch(&reference).await,
            Err(StorageError::InvalidReference { .. })
        ));
    }

    #[test]
    fn abandoned_insert_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let sink = SledSink::open(tmp.path(), DEFAULT_TREE).unwrap();
        let abandon = AbandonFlag::new();
        abandon.set();

        let err = insert_once(&sink.tree, "gone", b"late".to_vec(), &abandon).unwrap_err();
        assert!(matches!(err, StorageError::Abandoned { .. }));
        assert!(sink.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let sink = SledSink::open(tmp.path(), DEFAULT_TREE).unwrap();
        assert!(matches!(
            sink.fetch_key("Package/none").await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
