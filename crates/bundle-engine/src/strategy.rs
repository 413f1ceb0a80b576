//! Download strategy decider.

use crate::cas::ContentAddressedStore;
use crate::error::{BundleEngineError, Result};
use crate::manifest::{BundleFile, BundleManifest};
use crate::platform::Platform;

/// Per-connection latency + header overhead assumed for each missing file
/// when costing an incremental download. Tunable; the algorithm is monotone
/// in it.
pub const REQUEST_OVERHEAD_BYTES: u64 = 50_000;

/// The decider's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStrategy {
    NoDownloadNeeded,
    FullArchive {
        total_bytes: u64,
    },
    Incremental {
        files: Vec<BundleFile>,
        total_bytes: u64,
    },
}

impl DownloadStrategy {
    pub fn total_bytes(&self) -> u64 {
        match self {
            DownloadStrategy::NoDownloadNeeded => 0,
            DownloadStrategy::FullArchive { total_bytes } => *total_bytes,
            DownloadStrategy::Incremental { total_bytes, .. } => *total_bytes,
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, DownloadStrategy::Incremental { .. })
    }
}

/// Decide between full-archive and per-file download.
/// Ordering of `missing` follows the manifest's file order, for
/// reproducible tests.
pub async fn decide(
    manifest: &BundleManifest,
    platform: Platform,
    cas: &ContentAddressedStore,
) -> Result<DownloadStrategy> {
    let mut missing = Vec::new();
    for file in manifest.files_for_platform(platform) {
        if !cas.contains(&file.hash).await {
            missing.push(file.clone());
        }
    }

    if missing.is_empty() {
        return Ok(DownloadStrategy::NoDownloadNeeded);
    }

    let archive = manifest.archive_for(platform).ok_or_else(|| {
        BundleEngineError::Strategy(format!(
            "manifest has no archive entry for platform {platform}"
        ))
    })?;

    let per_file_cost: u64 = missing.iter().map(|f| f.size).sum::<u64>()
        + missing.len() as u64 * REQUEST_OVERHEAD_BYTES;

    if archive.size <= per_file_cost {
        Ok(DownloadStrategy::FullArchive {
            total_bytes: archive.size,
        })
    } else {
        let total_bytes = missing.iter().map(|f| f.size).sum();
        Ok(DownloadStrategy::Incremental {
            files: missing,
            total_bytes,
        })
    }
}
