//! Content-addressable store.
//!
//! Entries commit via a temp-file write followed by an atomic rename into
//! place, generalized from "one binary slot" to "many hash-named entries".

use crate::hash::{hash_file, ContentHash};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory of hash-named files; filename is the lowercase hex of the
/// file's own SHA-256.
#[derive(Clone)]
pub struct ContentAddressedStore {
    root: PathBuf,
}

impl ContentAddressedStore {
    /// `root` must already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.hex())
    }

    /// File existence in the CAS directory. Readers never take the
    /// write-scope lock.
    pub async fn contains(&self, hash: &ContentHash) -> bool {
        fs::metadata(self.entry_path(hash)).await.is_ok()
    }

    /// Present path or `None`.
    pub async fn path_of(&self, hash: &ContentHash) -> Option<PathBuf> {
        let path = self.entry_path(hash);
        if fs::metadata(&path).await.is_ok() {
            Some(path)
        } else {
            None
        }
    }

    /// Compute the hash of `temp_path` and atomically rename it into the
    /// store. If an entry with that hash already exists, the temp file is
    /// discarded and the existing hash is returned — insert is idempotent.
    pub async fn insert(&self, temp_path: &Path) -> crate::error::Result<ContentHash> {
        let hash = hash_file(temp_path).await?;
        self.commit(temp_path, &hash).await?;
        Ok(hash)
    }

    /// Like [`Self::insert`], but verifies the streamed hash against
    /// `expected` first; on mismatch the temp file is deleted and `false`
    /// is returned without mutating the store.
    pub async fn insert_expecting(
        &self,
        temp_path: &Path,
        expected: &ContentHash,
    ) -> crate::error::Result<bool> {
        let actual = hash_file(temp_path).await?;
        if actual != *expected {
            let _ = fs::remove_file(temp_path).await;
            return Ok(false);
        }
        self.commit(temp_path, &actual).await?;
        Ok(true)
    }

    async fn commit(&self, temp_path: &Path, hash: &ContentHash) -> crate::error::Result<()> {
        let dest = self.entry_path(hash);
        if fs::metadata(&dest).await.is_ok() {
            let _ = fs::remove_file(temp_path).await;
            return Ok(());
        }
        match fs::rename(temp_path, &dest).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(temp_path).await;
                Err(err.into())
            }
        }
    }

    /// Re-hash the stored file and compare against its own name.
    pub async fn verify(&self, hash: &ContentHash) -> bool {
        let path = self.entry_path(hash);
        match hash_file(&path).await {
            Ok(actual) => actual == *hash,
            Err(_) => false,
        }
    }

    /// Remove an entry. Reserved for the cleanup collector.
    pub async fn delete(&self, hash: &ContentHash) -> crate::error::Result<bool> {
        match fs::remove_file(self.entry_path(hash)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Enumerate current entries.
    pub async fn list(&self) -> crate::error::Result<Vec<ContentHash>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                entries.push(ContentHash::sha256(name));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write_temp(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn insert_names_file_by_its_own_hash() {
        let dir = tempdir().unwrap();
        let cas = ContentAddressedStore::new(dir.path());
        let temp = write_temp(dir.path(), "tmp1", b"hello").await;
        let hash = cas.insert(&temp).await.unwrap();
        assert!(cas.contains(&hash).await);
        assert_eq!(
            cas.path_of(&hash).await.unwrap().file_name().unwrap().to_str().unwrap(),
            hash.hex()
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_idempotent() {
        let dir = tempdir().unwrap();
        let cas = ContentAddressedStore::new(dir.path());
        let t1 = write_temp(dir.path(), "t1", b"same bytes").await;
        let t2 = write_temp(dir.path(), "t2", b"same bytes").await;
        let h1 = cas.insert(&t1).await.unwrap();
        let h2 = cas.insert(&t2).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(cas.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_expecting_mismatch_deletes_temp_and_leaves_cas_unchanged() {
        let dir = tempdir().unwrap();
        let cas = ContentAddressedStore::new(dir.path());
        let temp = write_temp(dir.path(), "t1", b"actual content").await;
        let wrong = ContentHash::sha256("0".repeat(64));
        let ok = cas.insert_expecting(&temp, &wrong).await.unwrap();
        assert!(!ok);
        assert!(!temp.exists());
        assert!(cas.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_detects_corruption() {
        let dir = tempdir().unwrap();
        let cas = ContentAddressedStore::new(dir.path());
        let temp = write_temp(dir.path(), "t1", b"pristine").await;
        let hash = cas.insert(&temp).await.unwrap();
        assert!(cas.verify(&hash).await);

        tokio::fs::write(cas.path_of(&hash).await.unwrap(), b"corrupted")
            .await
            .unwrap();
        assert!(!cas.verify(&hash).await);
    }

    #[tokio::test]
    async fn delete_then_list_reflects_removal() {
        let dir = tempdir().unwrap();
        let cas = ContentAddressedStore::new(dir.path());
        let temp = write_temp(dir.path(), "t1", b"gone soon").await;
        let hash = cas.insert(&temp).await.unwrap();
        assert!(cas.delete(&hash).await.unwrap());
        assert!(!cas.contains(&hash).await);
        assert!(cas.list().await.unwrap().is_empty());
    }
}
