//! Storage manager. Owns every path under the app-data root and
//! serialises all writers through a single write-scope lock.

use crate::cas::ContentAddressedStore;
use crate::error::{BundleEngineError, Result};
use crate::hash::hash_file;
use crate::linker;
use crate::manifest::BundleManifest;
use crate::platform::Platform;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

const MANIFEST_FILE_NAME: &str = "manifest.json";
const CAS_DIR_NAME: &str = "cas";
const VERSIONS_DIR_NAME: &str = "versions";
const TEMP_DIR_NAME: &str = "temp";

/// Why a file in a version directory failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailureReason {
    Missing,
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    pub path: String,
    pub expected: String,
    pub actual: Option<String>,
    pub reason: VerificationFailureReason,
}

/// Owns `<appDataRoot>/{manifest.json, cas/, versions/<bn>/, temp/}`.
pub struct StorageManager {
    root: PathBuf,
    cas: ContentAddressedStore,
    write_lock: Arc<Mutex<()>>,
}

impl StorageManager {
    /// Create the directory tree if it does not already exist.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(CAS_DIR_NAME)).await?;
        fs::create_dir_all(root.join(VERSIONS_DIR_NAME)).await?;
        fs::create_dir_all(root.join(TEMP_DIR_NAME)).await?;
        let cas = ContentAddressedStore::new(root.join(CAS_DIR_NAME));
        Ok(Self {
            root,
            cas,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cas(&self) -> &ContentAddressedStore {
        &self.cas
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn version_path(&self, build_number: u64) -> PathBuf {
        self.root.join(VERSIONS_DIR_NAME).join(build_number.to_string())
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR_NAME)
    }

    /// Raw bytes of `manifest.json`, or `None` if it does not exist.
    pub async fn load_installed_manifest_raw(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(self.manifest_path()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Loosely parse `manifest.json` to extract only `buildNumber`. Returns
    /// `None` if the file is absent or unparseable — "installed" is defined
    /// by successful parse.
    pub async fn installed_build_number(&self) -> Option<u64> {
        let raw = self.load_installed_manifest_raw().await.ok().flatten()?;
        #[derive(serde::Deserialize)]
        struct BuildNumberOnly {
            #[serde(rename = "buildNumber")]
            build_number: u64,
        }
        serde_json::from_slice::<BuildNumberOnly>(&raw)
            .ok()
            .map(|v| v.build_number)
    }

    pub async fn has_version(&self, build_number: u64) -> bool {
        fs::metadata(self.version_path(build_number)).await.is_ok()
    }

    /// Installed build numbers under `versions/`, sorted ascending.
    /// Non-numeric entries are ignored.
    pub async fn list_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        let mut dir = fs::read_dir(self.root.join(VERSIONS_DIR_NAME)).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(bn) = name.parse::<u64>() {
                    versions.push(bn);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Allocate a fresh path inside `temp/`.
    pub async fn create_temp_file(&self, prefix: &str) -> Result<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(self.temp_dir())?;
        let (_, path) = temp.keep().map_err(|e| BundleEngineError::Io(e.error))?;
        Ok(path)
    }

    /// For each file in `manifest.filesForPlatform(platform)`, check it
    /// exists at `versionPath(bn)/file.path` and hashes to `file.hash`.
    pub async fn verify_version(
        &self,
        manifest: &BundleManifest,
        platform: Platform,
    ) -> Result<Vec<VerificationFailure>> {
        let version_dir = self.version_path(manifest.build_number);
        let mut failures = Vec::new();
        for file in manifest.files_for_platform(platform) {
            let path = version_dir.join(&file.path);
            match fs::metadata(&path).await {
                Err(_) => failures.push(VerificationFailure {
                    path: file.path.clone(),
                    expected: file.hash.to_string(),
                    actual: None,
                    reason: VerificationFailureReason::Missing,
                }),
                Ok(_) => {
                    let actual = hash_file(&path).await?;
                    if actual != file.hash {
                        failures.push(VerificationFailure {
                            path: file.path.clone(),
                            expected: file.hash.to_string(),
                            actual: Some(actual.to_string()),
                            reason: VerificationFailureReason::HashMismatch,
                        });
                    }
                }
            }
        }
        Ok(failures)
    }

    /// Acquire the write-scope mutex and run `block` with exclusive access
    /// to every privileged mutation. Only one writer runs at a time across
    /// the whole process.
    pub async fn with_write_scope<F, Fut, T>(&self, block: F) -> T
    where
        F: FnOnce(WriteScope<'_>) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let guard = self.write_lock.clone().lock_owned().await;
        let scope = WriteScope {
            storage: self,
            _guard: guard,
        };
        block(scope).await
    }
}

/// The only place on-disk mutations occur.
pub struct WriteScope<'a> {
    storage: &'a StorageManager,
    _guard: OwnedMutexGuard<()>,
}

impl<'a> WriteScope<'a> {
    /// For each file in the platform view, require its CAS entry already
    /// exist (the caller must have populated CAS) and create/refresh the
    /// link at `versionPath(bn)/file.path`. Idempotent: a link already
    /// pointing at the right CAS entry is left alone.
    pub async fn prepare_version(&self, manifest: &BundleManifest, platform: Platform) -> Result<()> {
        let version_dir = self.storage.version_path(manifest.build_number);
        fs::create_dir_all(&version_dir).await?;
        for file in manifest.files_for_platform(platform) {
            let source = self
                .storage
                .cas
                .path_of(&file.hash)
                .await
                .ok_or_else(|| BundleEngineError::MissingCasEntry(file.hash.to_string()))?;
            let dest = version_dir.join(&file.path);
            linker::link(&dest, &source)?;
        }
        Ok(())
    }

    /// Write `manifest.json.tmp`, fsync, rename over `manifest.json`. This
    /// rename is the commit point for an update cycle.
    pub async fn save_installed_manifest(&self, raw_bytes: &[u8]) -> Result<()> {
        let tmp_path = self.storage.manifest_path().with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            file.write_all(raw_bytes).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, self.storage.manifest_path()).await?;
        Ok(())
    }

    /// Recursive delete of `versions/<bn>/`. Breaks links, never their
    /// targets in `cas/`.
    pub async fn delete_version_directory(&self, build_number: u64) -> Result<()> {
        let path = self.storage.version_path(build_number);
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every regular file in `temp/`.
    pub async fn cleanup_temp(&self) -> Result<()> {
        let mut dir = fs::read_dir(self.storage.temp_dir()).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    /// Delegate insertion of a downloaded file into CAS.
    pub async fn store_into_cas(
        &self,
        temp_path: &Path,
        expected: Option<&crate::hash::ContentHash>,
    ) -> Result<crate::hash::ContentHash> {
        match expected {
            Some(expected) => {
                if self.storage.cas.insert_expecting(temp_path, expected).await? {
                    Ok(expected.clone())
                } else {
                    Err(BundleEngineError::HashMismatch {
                        path: temp_path.display().to_string(),
                        expected: expected.to_string(),
                        actual: hash_file(temp_path).await.map(|h| h.to_string()).unwrap_or_default(),
                    })
                }
            }
            None => self.storage.cas.insert(temp_path).await,
        }
    }

    pub fn cas(&self) -> &ContentAddressedStore {
        &self.storage.cas
    }

    pub fn version_path(&self, build_number: u64) -> PathBuf {
        self.storage.version_path(build_number)
    }
}
