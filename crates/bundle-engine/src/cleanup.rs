//! Cleanup collector: reclaims superseded versions and orphaned CAS entries.
//!
//! Only runs from the engine's no-update branch, under a write scope so it
//! cannot race version preparation. Preconditions are checked here too
//! (defence in depth): a bad manifest-of-record or a version directory that
//! doesn't validate yields an empty, no-op result rather than an error.

use crate::error::Result;
use crate::events::CleanupResult;
use crate::hash::ContentHash;
use crate::manifest::BundleManifest;
use crate::platform::Platform;
use crate::storage::StorageManager;
use std::collections::HashSet;

/// Run one cleanup pass against the installed manifest.
pub async fn run(storage: &StorageManager, platform: Platform) -> Result<CleanupResult> {
    let raw = match storage.load_installed_manifest_raw().await? {
        Some(raw) => raw,
        None => return Ok(CleanupResult::default()),
    };
    let manifest: BundleManifest = match serde_json::from_slice(&raw) {
        Ok(manifest) => manifest,
        Err(_) => return Ok(CleanupResult::default()),
    };
    if !storage.verify_version(&manifest, platform).await?.is_empty() {
        return Ok(CleanupResult::default());
    }

    storage
        .with_write_scope(|scope| async move {
            let mut result = CleanupResult::default();
            let installed_bn = manifest.build_number;

            for bn in storage.list_versions().await? {
                if bn == installed_bn {
                    continue;
                }
                scope.delete_version_directory(bn).await?;
                result.versions_removed.push(bn);
            }

            let live: HashSet<ContentHash> = manifest.files.iter().map(|f| f.hash.clone()).collect();
            for hash in storage.cas().list().await? {
                if !live.contains(&hash) && scope.cas().delete(&hash).await? {
                    result.cas_files_removed += 1;
                }
            }

            Ok(result)
        })
        .await
}
