//! Background update loop.
//!
//! A single cooperative task: run a cycle, sleep `checkInterval`, repeat.
//! Cancellation is the only way out; a cycle's own errors are surfaced as
//! `Error` events and never stop the loop.

use crate::engine::UpdateEngine;
use crate::events::UpdateEvent;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run the update loop until `cancel` is triggered. Intended to be spawned
/// once per process via `tokio::spawn`.
pub async fn run(
    engine: &UpdateEngine,
    check_interval: Duration,
    on_event: &(dyn Fn(UpdateEvent) + Send + Sync),
    cancel: CancellationToken,
) {
    loop {
        engine.run_cycle(on_event).await;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(check_interval) => {}
        }

        if cancel.is_cancelled() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadManager;
    use crate::hash::hash_bytes;
    use crate::manifest::{BundleFile, BundleManifest, PlatformBundle};
    use crate::platform::{Arch, Os, Platform};
    use crate::retry::RetryConfig;
    use crate::signature::SignatureVerifier;
    use crate::storage::StorageManager;
    use base64::{engine::general_purpose, Engine as _};
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use url::Url;

    fn platform() -> Platform {
        Platform::new(Os::Linux, Arch::X64)
    }

    async fn publish(dir: &std::path::Path, signing_key: &SigningKey) {
        tokio::fs::create_dir_all(dir.join("files")).await.unwrap();
        let hash = hash_bytes(b"payload");
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
            build_number: 1,
            created_at: "2026-01-01T00:00:00Z".into(),
            min_host_version: "1.0.0".into(),
            host_update_url: None,
            files: vec![BundleFile {
                path: "app.bin".into(),
                hash: hash.clone(),
                size: 7,
                os: None,
                arch: None,
            }],
            main_entry: "x".into(),
            archives,
            signature: None,
        };
        let signature = signing_key.sign(&manifest.to_canonical_signed_bytes());
        manifest.signature = Some(format!(
            "ed25519:{}",
            general_purpose::STANDARD.encode(signature.to_bytes())
        ));
        tokio::fs::write(dir.join("manifest.json"), manifest.to_distribution_json())
            .await
            .unwrap();
        tokio::fs::write(dir.join("files").join(hash.hex()), b"payload")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn loop_stops_promptly_on_cancellation() {
        let storage_dir = tempdir().unwrap();
        let server_dir = tempdir().unwrap();
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        publish(server_dir.path(), &signing_key).await;

        let mut base = Url::from_file_path(server_dir.path()).unwrap();
        base.path_segments_mut().unwrap().push("");

        let engine = UpdateEngine::new(
            StorageManager::new(storage_dir.path()).await.unwrap(),
            DownloadManager::new(base),
            SignatureVerifier::new(signing_key.verifying_key()),
            platform(),
            "1.0.0",
            RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: Duration::from_millis(5),
            },
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink = move |event: UpdateEvent| sink_events.lock().unwrap().push(event);

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        run(&engine, Duration::from_secs(3600), &sink, cancel).await;

        assert!(!events.lock().unwrap().is_empty());
        assert_eq!(engine.storage().installed_build_number().await, Some(1));
    }
}
