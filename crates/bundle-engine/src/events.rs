//! Update-cycle and validation-progress event types.

use crate::error::ErrorKind;
use crate::retry::BackingOff;
use std::time::{Duration, SystemTime};

/// Progress reported while downloading a bundle (full archive or
/// incremental).
#[derive(Debug, Clone, Default)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub current_path: Option<String>,
    pub files_completed: u32,
    pub total_files: u32,
}

/// Summary attached to `UpdateAvailable`.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    pub current_build_number: Option<u64>,
    pub new_build_number: u64,
    pub download_size: u64,
    pub is_incremental: bool,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub versions_removed: Vec<u64>,
    pub cas_files_removed: u64,
    pub bytes_freed: u64,
    pub warnings: Vec<String>,
}

/// One update-cycle event. Emitted in order by the update engine.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    Checking,
    UpToDate { build_number: u64 },
    UpdateAvailable { info: UpdateInfo },
    Downloading { progress: DownloadProgress },
    BackingOff {
        retry_number: u32,
        delay: Duration,
        next_retry_at: SystemTime,
        error: String,
    },
    UpdateReady { build_number: u64 },
    CleanupComplete { result: CleanupResult },
    Error { kind: ErrorKind, message: String, recoverable: bool },
}

impl From<BackingOff> for UpdateEvent {
    fn from(b: BackingOff) -> Self {
        UpdateEvent::BackingOff {
            retry_number: b.retry_number,
            delay: b.delay,
            next_retry_at: b.next_retry_at,
            error: b.error,
        }
    }
}

/// Pre-launch validation progress.
#[derive(Debug, Clone)]
pub enum ValidationProgress {
    LoadingManifest,
    VerifyingSignature,
    VerifyingFiles { done: u32, total: u32, percent: f32 },
    Complete,
}
