//! Per-invocation session storage.
//!
//! Every pairing attempt gets its own directory under the configured root,
//! named by a fresh UUID, so concurrent invocations never see each other's
//! challenges or credentials.

use qrlink_core::error::PairError;
use qrlink_core::event::CREDENTIALS_FILE;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A session directory owned by one invocation. Removed on [`remove`] or,
/// failing that, on drop.
///
/// [`remove`]: SessionStorage::remove
#[derive(Debug)]
pub struct SessionStorage {
    dir: PathBuf,
    removed: bool,
}

impl SessionStorage {
    /// Create a fresh uniquely named directory under `root`.
    pub async fn prepare(root: &Path) -> Result<Self, PairError> {
        Self::prepare_at(root.join(Uuid::new_v4().to_string())).await
    }

    /// Destroy anything at `dir`, then create it empty.
    pub async fn prepare_at(dir: PathBuf) -> Result<Self, PairError> {
        reset_dir(&dir).await?;
        debug!("session storage ready at {}", dir.display());
        Ok(Self {
            dir,
            removed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    /// Read the credentials file. `Ok(None)` if the backend never wrote it.
    pub async fn read_credentials(&self) -> Result<Option<Vec<u8>>, PairError> {
        match tokio::fs::read(self.credentials_path()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PairError::Storage(format!(
                "failed to read {}: {e}",
                self.credentials_path().display()
            ))),
        }
    }

    /// Delete the directory. Idempotent.
    pub async fn remove(&mut self) -> Result<(), PairError> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        remove_if_present(&self.dir).await
    }
}

impl Drop for SessionStorage {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("failed to remove {}: {e}", self.dir.display());
                }
            }
        }
    }
}

async fn remove_if_present(dir: &Path) -> Result<(), PairError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PairError::Storage(format!(
            "failed to remove {}: {e}",
            dir.display()
        ))),
    }
}

/// Destroy-then-create. Succeeds whether or not `dir` existed.
pub async fn reset_dir(dir: &Path) -> Result<(), PairError> {
    remove_if_present(dir).await?;
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        PairError::Storage(format!("failed to create {}: {e}", dir.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_missing_dir_is_ok() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a/b/c");
        reset_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        // Second reset on an existing dir also succeeds.
        reset_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_reset_discards_stale_contents() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("creds.json"), "{\"stale\":true}").unwrap();

        let storage = SessionStorage::prepare_at(dir.clone()).await.unwrap();
        assert!(storage.read_credentials().await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_creates_unique_dirs() {
        let root = tempfile::tempdir().unwrap();
        let a = SessionStorage::prepare(root.path()).await.unwrap();
        let b = SessionStorage::prepare(root.path()).await.unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().starts_with(root.path()));
        assert!(a.dir().is_dir() && b.dir().is_dir());
    }

    #[tokio::test]
    async fn test_read_credentials_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let storage = SessionStorage::prepare(root.path()).await.unwrap();
        std::fs::write(storage.credentials_path(), br#"{"me":{"id":"1"}}"#).unwrap();
        let bytes = storage.read_credentials().await.unwrap().unwrap();
        assert_eq!(bytes, br#"{"me":{"id":"1"}}"#.to_vec());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut storage = SessionStorage::prepare(root.path()).await.unwrap();
        let dir = storage.dir().to_path_buf();
        storage.remove().await.unwrap();
        storage.remove().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let storage = SessionStorage::prepare(root.path()).await.unwrap();
            storage.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }
}
