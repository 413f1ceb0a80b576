//! Update engine: one update cycle, emitted as an ordered event stream.
//! Drives a multi-file, multi-version activation from a download-strategy
//! decision through to on-disk commit.

use crate::cleanup;
use crate::download::DownloadManager;
use crate::error::ErrorKind;
use crate::events::{UpdateEvent, UpdateInfo};
use crate::manifest::BundleManifest;
use crate::platform::Platform;
use crate::retry::{self, RetryConfig};
use crate::signature::SignatureVerifier;
use crate::storage::StorageManager;
use crate::strategy::{self, DownloadStrategy};

pub struct UpdateEngine {
    storage: StorageManager,
    download: DownloadManager,
    verifier: SignatureVerifier,
    platform: Platform,
    host_version: String,
    retry: RetryConfig,
}

impl UpdateEngine {
    pub fn new(
        storage: StorageManager,
        download: DownloadManager,
        verifier: SignatureVerifier,
        platform: Platform,
        host_version: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            storage,
            download,
            verifier,
            platform,
            host_version: host_version.into(),
            retry,
        }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Run exactly one update cycle, emitting events in a fixed order.
    /// Never panics or propagates an error out of the
    /// cycle — every terminal failure becomes an `Error` event so the
    /// background loop can keep running.
    pub async fn run_cycle(&self, on_event: &(dyn Fn(UpdateEvent) + Send + Sync)) {
        on_event(UpdateEvent::Checking);

        let fetch_result = retry::run_with_retry(
            self.retry,
            || self.download.fetch_manifest(),
            |backoff| on_event(backoff.into()),
        )
        .await;

        let (manifest, raw) = match fetch_result {
            Ok(v) => v,
            Err(err) => {
                on_event(UpdateEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    recoverable: err.is_recoverable(),
                });
                return;
            }
        };

        if !self.verifier.verify_raw_json(&raw).unwrap_or(false) {
            on_event(UpdateEvent::Error {
                kind: ErrorKind::SignatureInvalid,
                message: "manifest signature invalid".into(),
                recoverable: false,
            });
            return;
        }

        if !manifest.supports_platform(self.platform) {
            on_event(UpdateEvent::Error {
                kind: ErrorKind::PlatformUnsupported,
                message: format!("platform {} is not supported by this manifest", self.platform),
                recoverable: false,
            });
            return;
        }

        let host_satisfied = match manifest.host_version_satisfies(&self.host_version) {
            Ok(v) => v,
            Err(err) => {
                on_event(UpdateEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    recoverable: false,
                });
                return;
            }
        };
        if !host_satisfied {
            on_event(UpdateEvent::Error {
                kind: ErrorKind::HostTooOld,
                message: format!(
                    "host {} is older than required {}",
                    self.host_version, manifest.min_host_version
                ),
                recoverable: false,
            });
            return;
        }

        let installed_bn = self.storage.installed_build_number().await;

        if let Some(installed_bn) = installed_bn {
            if manifest.build_number < installed_bn {
                on_event(UpdateEvent::Error {
                    kind: ErrorKind::Downgrade,
                    message: format!(
                        "offered build {} is older than installed build {installed_bn}",
                        manifest.build_number
                    ),
                    recoverable: false,
                });
                return;
            }
            if manifest.build_number == installed_bn {
                on_event(UpdateEvent::UpToDate {
                    build_number: installed_bn,
                });
                self.run_cleanup(on_event).await;
                return;
            }
        }

        self.run_update(manifest, raw, installed_bn, on_event).await
    }

    /// `manifest.buildNumber > installedBuildNumber()` already holds here.
    /// Downloads, then activates under a write scope, re-checking the
    /// downgrade condition immediately before activation to close the
    /// TOCTOU window between the check and the write-scoped activation.
    async fn run_update(
        &self,
        manifest: BundleManifest,
        raw: Vec<u8>,
        installed_bn: Option<u64>,
        on_event: &(dyn Fn(UpdateEvent) + Send + Sync),
    ) {
        let strategy = match strategy::decide(&manifest, self.platform, self.storage.cas()).await {
            Ok(s) => s,
            Err(err) => {
                on_event(UpdateEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    recoverable: false,
                });
                return;
            }
        };

        on_event(UpdateEvent::UpdateAvailable {
            info: UpdateInfo {
                current_build_number: installed_bn,
                new_build_number: manifest.build_number,
                download_size: strategy.total_bytes(),
                is_incremental: strategy.is_incremental(),
            },
        });

        if !matches!(strategy, DownloadStrategy::NoDownloadNeeded) {
            let temp_dir = self.storage.root().join("temp");
            let download_result = retry::run_with_retry(
                self.retry,
                || {
                    self.download.download_bundle(
                        &manifest,
                        self.platform,
                        self.storage.cas(),
                        &temp_dir,
                        |progress| on_event(UpdateEvent::Downloading { progress }),
                    )
                },
                |backoff| on_event(backoff.into()),
            )
            .await;

            if let Err(err) = download_result {
                on_event(UpdateEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    recoverable: err.is_recoverable(),
                });
                return;
            }
        }

        let activation = self
            .storage
            .with_write_scope(|scope| async move {
                let current = self.storage.installed_build_number().await;
                if let Some(current) = current {
                    if manifest.build_number <= current {
                        return Err(crate::error::BundleEngineError::Downgrade {
                            offered: manifest.build_number,
                            installed: current,
                        });
                    }
                }
                scope.prepare_version(&manifest, self.platform).await?;
                scope.save_installed_manifest(&raw).await?;
                Ok(())
            })
            .await;

        match activation {
            Ok(()) => on_event(UpdateEvent::UpdateReady {
                build_number: manifest.build_number,
            }),
            Err(err) => on_event(UpdateEvent::Error {
                kind: err.kind(),
                message: err.to_string(),
                recoverable: false,
            }),
        }
    }

    /// Only reached from the no-update branch.
    async fn run_cleanup(&self, on_event: &(dyn Fn(UpdateEvent) + Send + Sync)) {
        match cleanup::run(&self.storage, self.platform).await {
            Ok(result) => on_event(UpdateEvent::CleanupComplete { result }),
            Err(err) => on_event(UpdateEvent::Error {
                kind: err.kind(),
                message: err.to_string(),
                recoverable: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::manifest::{BundleFile, PlatformBundle};
    use crate::platform::{Arch, Os};
    use base64::{engine::general_purpose, Engine as _};
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use url::Url;

    fn platform() -> Platform {
        Platform::new(Os::Linux, Arch::X64)
    }

    async fn publish_server(dir: &std::path::Path, signing_key: &SigningKey, build_number: u64, content: &[u8]) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let hash = hash_bytes(content);
        let mut archives = BTreeMap::new();
        archives.insert(
            platform(),
            PlatformBundle {
                archive_path: "archive.tar.gz".into(),
                size: 999_999_999,
            },
        );
        let mut manifest = BundleManifest {
            schema_version: 1,
            build_number,
            created_at: "2026-01-01T00:00:00Z".into(),
            min_host_version: "1.0.0".into(),
            host_update_url: None,
            files: vec![BundleFile {
                path: "app.bin".into(),
                hash: hash.clone(),
                size: content.len() as u64,
                os: None,
                arch: None,
            }],
            main_entry: "x".into(),
            archives,
            signature: None,
        };
        let unsigned = manifest.to_canonical_signed_bytes();
        let signature = signing_key.sign(&unsigned);
        manifest.signature = Some(format!(
            "ed25519:{}",
            general_purpose::STANDARD.encode(signature.to_bytes())
        ));

        tokio::fs::write(dir.join("manifest.json"), manifest.to_distribution_json())
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.join("files")).await.unwrap();
        tokio::fs::write(dir.join("files").join(hash.hex()), content)
            .await
            .unwrap();
    }

    fn base_url(dir: &std::path::Path) -> Url {
        let mut url = Url::from_file_path(dir).unwrap();
        url.path_segments_mut().unwrap().push("");
        url
    }

    async fn engine(storage_dir: &std::path::Path, server_dir: &std::path::Path, signing_key: &SigningKey) -> UpdateEngine {
        UpdateEngine::new(
            StorageManager::new(storage_dir).await.unwrap(),
            DownloadManager::new(base_url(server_dir)),
            SignatureVerifier::new(signing_key.verifying_key()),
            platform(),
            "1.0.0",
            RetryConfig {
                max_attempts: 1,
                initial_delay: std::time::Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: std::time::Duration::from_millis(5),
            },
        )
    }

    fn collect_events() -> (impl Fn(UpdateEvent) + Send + Sync, std::sync::Arc<Mutex<Vec<UpdateEvent>>>) {
        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink = move |event: UpdateEvent| sink_events.lock().unwrap().push(event);
        (sink, events)
    }

    #[tokio::test]
    async fn fresh_install_reaches_update_ready() {
        let storage_dir = tempdir().unwrap();
        let server_dir = tempdir().unwrap();
        let signing_key = SigningKey::from_bytes(&[1u8; 32]);
        publish_server(server_dir.path(), &signing_key, 1, b"app contents").await;

        let engine = engine(storage_dir.path(), server_dir.path(), &signing_key).await;
        let (sink, events) = collect_events();
        engine.run_cycle(&sink).await;

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(UpdateEvent::Checking)));
        assert!(matches!(events.last(), Some(UpdateEvent::UpdateReady { build_number: 1 })));
        assert_eq!(engine.storage().installed_build_number().await, Some(1));
    }

    #[tokio::test]
    async fn equal_build_number_is_up_to_date_and_cleans_up() {
        let storage_dir = tempdir().unwrap();
        let server_dir = tempdir().unwrap();
        let signing_key = SigningKey::from_bytes(&[2u8; 32]);
        publish_server(server_dir.path(), &signing_key, 1, b"app contents").await;

        let engine = engine(storage_dir.path(), server_dir.path(), &signing_key).await;
        let (sink, _) = collect_events();
        engine.run_cycle(&sink).await;

        let (sink2, events2) = collect_events();
        engine.run_cycle(&sink2).await;
        let events2 = events2.lock().unwrap();
        assert!(matches!(events2.first(), Some(UpdateEvent::Checking)));
        assert!(events2
            .iter()
            .any(|e| matches!(e, UpdateEvent::UpToDate { build_number: 1 })));
        assert!(events2
            .iter()
            .any(|e| matches!(e, UpdateEvent::CleanupComplete { .. })));
    }

    #[tokio::test]
    async fn lower_build_number_is_rejected_as_downgrade() {
        let storage_dir = tempdir().unwrap();
        let server_dir = tempdir().unwrap();
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        publish_server(server_dir.path(), &signing_key, 5, b"five").await;

        let engine = engine(storage_dir.path(), server_dir.path(), &signing_key).await;
        let (sink, _) = collect_events();
        engine.run_cycle(&sink).await;
        assert_eq!(engine.storage().installed_build_number().await, Some(5));

        publish_server(server_dir.path(), &signing_key, 4, b"four").await;
        let (sink2, events2) = collect_events();
        engine.run_cycle(&sink2).await;
        let events2 = events2.lock().unwrap();
        assert!(events2
            .iter()
            .any(|e| matches!(e, UpdateEvent::Error { kind: ErrorKind::Downgrade, .. })));
        assert_eq!(engine.storage().installed_build_number().await, Some(5));
    }
}
