//! Download manager.
//!
//! Fetches manifests and payload bytes over HTTP(S) or `file://`, streams
//! to temp, verifies, and commits to CAS. Transport selection is invisible
//! to callers and hinges only on the URL scheme, enabling hermetic tests.

use crate::cas::ContentAddressedStore;
use crate::error::{BundleEngineError, Result};
use crate::events::DownloadProgress;
use crate::hash::ContentHash;
use crate::manifest::BundleManifest;
use crate::platform::Platform;
use crate::strategy::{self, DownloadStrategy};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Abstraction over fetching bytes from a base URL, hiding HTTP vs
/// `file://` behind one capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the full body of `url` into memory.
    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>>;

    /// Stream the body of `url` into `dest`, invoking `on_bytes` with each
    /// chunk's length as it is written.
    async fn fetch_to_file(&self, url: &Url, dest: &Path, on_bytes: &mut (dyn FnMut(u64) + Send)) -> Result<()>;
}

/// Pooled HTTP(S) client with connect/request timeouts.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(BundleEngineError::Network)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_to_file(&self, url: &Url, dest: &Path, on_bytes: &mut (dyn FnMut(u64) + Send)) -> Result<()> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            on_bytes(chunk.len() as u64);
        }
        file.flush().await?;
        Ok(())
    }
}

/// Direct-read transport for `file://` URLs, used to keep integration
/// tests hermetic and network-free.
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let path = url
            .to_file_path()
            .map_err(|_| BundleEngineError::validation(format!("not a file:// url: {url}")))?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn fetch_to_file(&self, url: &Url, dest: &Path, on_bytes: &mut (dyn FnMut(u64) + Send)) -> Result<()> {
        let bytes = self.fetch_bytes(url).await?;
        on_bytes(bytes.len() as u64);
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

/// Select a transport by URL scheme; invisible to callers above this
/// point.
pub fn transport_for(url: &Url) -> Result<Box<dyn Transport>> {
    match url.scheme() {
        "http" | "https" => Ok(Box::new(HttpTransport::new()?)),
        "file" => Ok(Box::new(FileTransport)),
        other => Err(BundleEngineError::validation(format!(
            "unsupported url scheme: {other}"
        ))),
    }
}

/// Result of one `downloadBundle` invocation.
#[derive(Debug, Clone, Default)]
pub struct DownloadResult {
    pub strategy_was_incremental: bool,
    pub total_bytes: u64,
}

pub struct DownloadManager {
    base_url: Url,
}

impl DownloadManager {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn join(&self, suffix: &str) -> Result<Url> {
        self.base_url
            .join(suffix)
            .map_err(|e| BundleEngineError::validation(format!("invalid url join: {e}")))
    }

    /// Fetch `baseUrl/manifest.json`; returns both the parsed manifest and
    /// the raw bytes (needed for raw-JSON signature verification).
    pub async fn fetch_manifest(&self) -> Result<(BundleManifest, Vec<u8>)> {
        let url = self.join("manifest.json")?;
        let transport = transport_for(&url)?;
        let raw = transport.fetch_bytes(&url).await?;
        let manifest: BundleManifest = serde_json::from_slice(&raw)?;
        Ok((manifest, raw))
    }

    /// Execute the chosen download strategy, streaming everything needed
    /// into `cas`, reporting byte-accurate progress via `on_progress`.
    pub async fn download_bundle(
        &self,
        manifest: &BundleManifest,
        platform: Platform,
        cas: &ContentAddressedStore,
        temp_dir: &Path,
        mut on_progress: impl FnMut(DownloadProgress) + Send,
    ) -> Result<DownloadResult> {
        let decision = strategy::decide(manifest, platform, cas).await?;

        match &decision {
            DownloadStrategy::NoDownloadNeeded => Ok(DownloadResult {
                strategy_was_incremental: false,
                total_bytes: 0,
            }),
            DownloadStrategy::FullArchive { total_bytes } => {
                let archive = manifest.archive_for(platform).ok_or_else(|| {
                    BundleEngineError::Strategy(format!("no archive for platform {platform}"))
                })?;
                let archive_url = self.join(&archive.archive_path)?;
                let transport = transport_for(&archive_url)?;

                let archive_temp = temp_dir.join(format!("archive-{}.tmp", manifest.build_number));
                let mut downloaded = 0u64;
                {
                    let mut cb = |n: u64| {
                        downloaded += n;
                        on_progress(DownloadProgress {
                            bytes_downloaded: downloaded,
                            total_bytes: *total_bytes,
                            current_path: Some(archive.archive_path.clone()),
                            files_completed: 0,
                            total_files: 1,
                        });
                    };
                    if let Err(err) = transport.fetch_to_file(&archive_url, &archive_temp, &mut cb).await {
                        let _ = tokio::fs::remove_file(&archive_temp).await;
                        return Err(err);
                    }
                }

                let commit = self
                    .extract_and_commit(manifest, platform, &archive_temp, temp_dir, cas)
                    .await;
                let _ = tokio::fs::remove_file(&archive_temp).await;
                commit?;

                Ok(DownloadResult {
                    strategy_was_incremental: false,
                    total_bytes: *total_bytes,
                })
            }
            DownloadStrategy::Incremental { files, total_bytes } => {
                let total_files = files.len() as u32;
                let mut downloaded = 0u64;
                for (i, file) in files.iter().enumerate() {
                    let url = self.join(&format!("files/{}", file.hash.hex()))?;
                    let transport = transport_for(&url)?;
                    let file_temp = temp_dir.join(format!("file-{}.tmp", file.hash.hex()));

                    {
                        let mut cb = |n: u64| {
                            downloaded += n;
                            on_progress(DownloadProgress {
                                bytes_downloaded: downloaded,
                                total_bytes: *total_bytes,
                                current_path: Some(file.path.clone()),
                                files_completed: i as u32,
                                total_files,
                            });
                        };
                        if let Err(err) = transport.fetch_to_file(&url, &file_temp, &mut cb).await {
                            let _ = tokio::fs::remove_file(&file_temp).await;
                            return Err(err);
                        }
                    }

                    let ok = cas.insert_expecting(&file_temp, &file.hash).await?;
                    if !ok {
                        let _ = tokio::fs::remove_file(&file_temp).await;
                        return Err(BundleEngineError::HashMismatch {
                            path: file.path.clone(),
                            expected: file.hash.to_string(),
                            actual: "mismatch".to_string(),
                        });
                    }
                }
                Ok(DownloadResult {
                    strategy_was_incremental: true,
                    total_bytes: *total_bytes,
                })
            }
        }
    }

    /// Iterate the downloaded archive's entries; every entry whose path is
    /// in the platform view is streamed to a temp file and committed via
    /// `insertExpecting`. Entries not in the view are skipped. Done inside
    /// `spawn_blocking` since `tar`/`flate2` are synchronous.
    async fn extract_and_commit(
        &self,
        manifest: &BundleManifest,
        platform: Platform,
        archive_path: &Path,
        temp_dir: &Path,
        cas: &ContentAddressedStore,
    ) -> Result<()> {
        let wanted: std::collections::HashMap<String, ContentHash> = manifest
            .files_for_platform(platform)
            .into_iter()
            .map(|f| (f.path.clone(), f.hash.clone()))
            .collect();

        let archive_path = archive_path.to_path_buf();
        let temp_dir = temp_dir.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || -> Result<Vec<(String, PathBuf)>> {
            let file = std::fs::File::open(&archive_path)?;
            let decoder = flate2::read::GzDecoder::new(file);
            let mut archive = tar::Archive::new(decoder);
            let mut out = Vec::new();
            for entry in archive.entries()? {
                let mut entry = entry?;
                let path = entry.path()?.to_string_lossy().replace('\\', "/");
                if !wanted.contains_key(&path) {
                    continue;
                }
                let dest = temp_dir.join(format!("entry-{:x}.tmp", out.len()));
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                std::fs::write(&dest, &buf)?;
                out.push((path, dest));
            }
            Ok(out)
        })
        .await
        .map_err(|e| BundleEngineError::Internal(format!("archive extraction task join error: {e}")))??;

        for (path, temp_path) in extracted {
            let expected = wanted.get(&path).expect("path came from wanted map");
            let ok = cas.insert_expecting(&temp_path, expected).await?;
            if !ok {
                return Err(BundleEngineError::HashMismatch {
                    path,
                    expected: expected.to_string(),
                    actual: "mismatch".to_string(),
                });
            }
        }
        Ok(())
    }
}
