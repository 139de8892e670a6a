//! File-system audit sink.
//!
//! Each record lands at `{root}/{key}.json`. Bytes are written to a temp file
//! in the destination directory, fsynced, then published with a no-clobber
//! rename, and the directory entry is fsynced too. Readers only ever see
//! complete records and an existing record is never replaced.
//!
//! Key segments longer than `MAX_SEGMENT_BYTES` are folded to a short prefix
//! plus their SHA-256 so every file name fits common file-system limits.

use std::borrow::Cow;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::audit_sink::{content_digest, AbandonFlag, AuditSink, SinkReference};
use crate::errors::StorageError;
use crate::path_resolver::StorageKey;

/// Not `file://`: keys hold literal `%XX` sequences a URI reader would decode.
pub const FILE_SCHEME: &str = "audit-file://";
const RECORD_EXTENSION: &str = "json";

/// Longest key segment used verbatim as a file or directory name.
pub const MAX_SEGMENT_BYTES: usize = 200;
const FOLDED_PREFIX_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Created,
    AlreadyPresent,
}

impl FileSink {
    /// Creates the root directory if needed and pins its absolute path.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| StorageError::io("creating audit root", e))?;
        let root = fs::canonicalize(root).map_err(|e| StorageError::io("resolving audit root", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `key` lives on disk.
    pub fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.path_for_key(key.as_str())
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        let relative: Vec<Cow<'_, str>> = key.split('/').map(fold_segment).collect();
        self.root
            .join(format!("{}.{RECORD_EXTENSION}", relative.join("/")))
    }

    /// Read a record by the reference `store` returned.
    pub async fn fetch(&self, reference: &SinkReference) -> Result<Vec<u8>, StorageError> {
        let raw = reference
            .as_str()
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| StorageError::invalid_reference(reference.as_str()))?;
        let path = PathBuf::from(raw);
        if !is_contained(&self.root, &path) {
            return Err(StorageError::invalid_reference(reference.as_str()));
        }
        read_record(&path, reference.as_str()).await
    }

    /// Read a record by its rendered storage key.
    pub async fn fetch_key(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for_key(key);
        if !is_contained(&self.root, &path) {
            return Err(StorageError::invalid_reference(key));
        }
        read_record(&path, key).await
    }
}

impl AuditSink for FileSink {
    fn reference_for(&self, key: &StorageKey) -> SinkReference {
        SinkReference::new(format!("{FILE_SCHEME}{}", self.path_for(key).display()))
    }

    async fn store(&self, key: &StorageKey, data: &[u8]) -> Result<SinkReference, StorageError> {
        let path = self.path_for(key);
        if !is_contained(&self.root, &path) {
            return Err(StorageError::invalid_reference(key.as_str()));
        }

        let root = self.root.clone();
        let bytes = data.to_vec();
        let key_name = key.to_string();
        let abandon = AbandonFlag::new();
        let on_drop = abandon.on_drop();

        let outcome = tokio::task::spawn_blocking(move || {
            write_once(&root, &path, &bytes, &key_name, &abandon)
        })
        .await
        .map_err(|_| StorageError::join("file sink write"))??;
        on_drop.disarm();

        if outcome == WriteOutcome::AlreadyPresent {
            tracing::debug!(key = %key, "identical record already stored");
        }
        Ok(self.reference_for(key))
    }
}

/// `segment` itself, or `{first 64 bytes}~{sha256}` when it is too long.
fn fold_segment(segment: &str) -> Cow<'_, str> {
    if segment.len() <= MAX_SEGMENT_BYTES {
        return Cow::Borrowed(segment);
    }
    let mut cut = FOLDED_PREFIX_BYTES;
    while !segment.is_char_boundary(cut) {
        cut -= 1;
    }
    Cow::Owned(format!(
        "{}~{}",
        &segment[..cut],
        content_digest(segment.as_bytes())
    ))
}

/// Only plain descendants of `root`; no `..`, no escaping absolute paths.
fn is_contained(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
}

async fn read_record(path: &Path, label: &str) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(label)),
        Err(e) => Err(StorageError::io("reading audit record", e)),
    }
}

fn compare_existing(path: &Path, data: &[u8], key: &str) -> Result<WriteOutcome, StorageError> {
    let existing = fs::read(path).map_err(|e| StorageError::io("reading existing record", e))?;
    if content_digest(&existing) == content_digest(data) {
        Ok(WriteOutcome::AlreadyPresent)
    } else {
        Err(StorageError::conflict(key))
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| StorageError::io("syncing record directory", e))
}

// Directory handles cannot be fsynced here; the rename is durable on its own.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn write_once(
    root: &Path,
    path: &Path,
    data: &[u8],
    key: &str,
    abandon: &AbandonFlag,
) -> Result<WriteOutcome, StorageError> {
    if path.exists() {
        return compare_existing(path, data, key);
    }
    if abandon.is_set() {
        return Err(StorageError::abandoned(key));
    }

    let parent = path
        .parent()
        .ok_or_else(|| StorageError::invalid_reference(key))?;
    let new_dirs = !parent.exists();
    fs::create_dir_all(parent).map_err(|e| StorageError::io("creating record directory", e))?;

    let mut tmp =
        NamedTempFile::new_in(parent).map_err(|e| StorageError::io("creating temp record", e))?;
    tmp.write_all(data)
        .map_err(|e| StorageError::io("writing temp record", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io("syncing temp record", e))?;

    // Last point where the temp file can still be discarded
    if abandon.is_set() {
        return Err(StorageError::abandoned(key));
    }

    match tmp.persist_noclobber(path) {
        Ok(_) => {}
        // Lost a race with a writer of the same key
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            return compare_existing(path, data, key)
        }
        Err(e) => return Err(StorageError::io("publishing record", e.error)),
    }

    sync_dir(parent)?;
    if new_dirs {
        for dir in parent.ancestors().skip(1) {
            if !dir.starts_with(root) {
                break;
            }
            sync_dir(dir)?;
        }
    }
    Ok(WriteOutcome::Created)
}
