//! File-based registry store
//!
//! Each key maps to `{root_dir}/{key}.blob`. `save` only stages the bytes;
//! `commit` writes every staged blob atomically (temp file + rename).
//! There is no compare-and-swap, so concurrent processes sharing a directory
//! get last-writer-wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;

use super::{RegistryStore, StorageError, StorageResult};

pub struct FileStore {
    root_dir: PathBuf,
    staged: Mutex<HashMap<String, Vec<u8>>>,
}

impl FileStore {
    pub fn new_in(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Store under the platform data directory (`~/.local/share/nudge` on Linux)
    pub fn new() -> anyhow::Result<Self> {
        let root_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?
            .join("nudge");
        Ok(Self::new_in(root_dir))
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Path of the blob for `key`. Characters outside `[A-Za-z0-9_-]` are
    /// replaced so a key can never escape the root directory.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root_dir.join(format!("{}.blob", file_name))
    }
}

#[async_trait]
impl RegistryStore for FileStore {
    async fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if let Some(bytes) = self.staged.lock().get(key) {
            return Ok(Some(bytes.clone()));
        }

        let path = self.blob_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::file_io(path, e)),
        }
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        self.staged.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn commit(&self) -> StorageResult<()> {
        let pending: Vec<(String, Vec<u8>)> = self.staged.lock().drain().collect();

        let mut remaining = pending.into_iter();
        while let Some((key, bytes)) = remaining.next() {
            let path = self.blob_path(&key);
            if let Err(e) = atomic_write(&path, &bytes).await {
                // Put back whatever did not reach disk unless a newer save
                // already replaced it.
                let mut staged = self.staged.lock();
                staged.entry(key).or_insert(bytes);
                for (key, bytes) in remaining {
                    staged.entry(key).or_insert(bytes);
                }
                return Err(e);
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

async fn atomic_write(dest: &Path, bytes: &[u8]) -> StorageResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| StorageError::unavailable(format!("{:?} has no parent directory", dest)))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::file_io(parent, e))?;

    let tmp = dest.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));

    fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::file_io(&tmp, e))?;

    // Best-effort cleanup on failure.
    if let Err(rename_err) = fs::rename(&tmp, dest).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::file_io(dest, rename_err));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SwapOutcome;

    #[tokio::test]
    async fn test_commit_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new_in(dir.path());

        store.save("notify-registry", b"snapshot".to_vec()).await.unwrap();
        assert!(!store.blob_path("notify-registry").exists());

        store.commit().await.unwrap();
        assert!(store.blob_path("notify-registry").exists());

        let reopened = FileStore::new_in(dir.path());
        assert_eq!(
            reopened.load("notify-registry").await.unwrap(),
            Some(b"snapshot".to_vec())
        );
    }

    #[tokio::test]
    async fn test_load_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new_in(dir.path().join("not-created-yet"));
        assert_eq!(store.load("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new_in(dir.path());
        let path = store.blob_path("../../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_no_compare_and_swap() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new_in(dir.path());
        let outcome = store.compare_and_swap("k", None, vec![1]).await.unwrap();
        assert_eq!(outcome, SwapOutcome::Unsupported);
    }
}
