//! Key-value blob storage and the JSON adapter the task store persists through.
//!
//! A [`BlobStore`] is a plain string-keyed store with no knowledge of tasks,
//! the shape of a browser's local storage. [`PersistenceAdapter`] layers JSON
//! (de)serialisation on top and maps backend failures onto [`StoreError`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

pub trait BlobStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PersistenceAdapter<B> {
    backend: B,
}

impl<B: BlobStore> PersistenceAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[tracing::instrument(skip(self, value))]
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let text = serde_json::to_string(value).map_err(|err| StoreError::persistence(key, err))?;
        debug!(bytes = text.len(), "writing blob");
        self.backend.set(key, &text).map_err(|err| {
            warn!(error = %format!("{err:#}"), "blob write rejected");
            StoreError::persistence(key, format!("{err:#}"))
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let raw = self
            .backend
            .get(key)
            .map_err(|err| StoreError::persistence(key, format!("{err:#}")))?;

        let Some(text) = raw else {
            debug!("no blob stored");
            return Ok(None);
        };
        if text.trim().is_empty() {
            debug!("blob is blank");
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::CorruptData {
                key: key.to_string(),
                source,
            })
    }

    #[tracing::instrument(skip(self))]
    pub fn remove(&self, key: &str) -> StoreResult<()> {
        self.backend
            .remove(key)
            .map_err(|err| StoreError::persistence(key, format!("{err:#}")))
    }
}

/// In-process blob store. Clones share the same contents, so a test can keep a
/// handle to inspect or sabotage what a store has written.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Rc<RefCell<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    blobs: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    fail_writes: bool,
    rejected_key: Option<String>,
    writes: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.inner.borrow_mut().quota_bytes = Some(quota_bytes);
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    /// Number of writes the store has accepted.
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }

    /// Rejects writes to `key` only; other keys keep working.
    pub fn reject_key(&self, key: Option<&str>) {
        self.inner.borrow_mut().rejected_key = key.map(str::to_string);
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.borrow().blobs.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes || inner.rejected_key.as_deref() == Some(key) {
            return Err(anyhow!("storage rejected write to {key}"));
        }

        if let Some(quota) = inner.quota_bytes {
            let others: usize = inner
                .blobs
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(anyhow!("quota exceeded: {needed} bytes > {quota} bytes"));
            }
        }

        inner.blobs.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.inner.borrow_mut().blobs.remove(key);
        Ok(())
    }
}

/// One file per key under a data directory, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    pub data_dir: PathBuf,
}

impl DirBlobStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened blob directory");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl BlobStore for DirBlobStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(text))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), bytes = value.len(), "saving blob atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}
