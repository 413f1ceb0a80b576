//! Ambient configuration. A plain struct with typed defaults; no env/CLI
//! parsing — assembling one from a config file or flags is the embedding
//! application's job.

use crate::platform::Platform;
use crate::retry::RetryConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default interval between background update checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Connect/read/write timeouts used by the download manager's HTTP
/// transport.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the engine needs to run: where to store state, where to
/// fetch manifests from, which platform to act as, and the public key
/// that authenticates manifests.
#[derive(Clone)]
pub struct EngineConfig {
    pub storage_root: PathBuf,
    pub base_url: Url,
    pub platform: Platform,
    pub host_version: String,
    pub public_key: [u8; 32],
    pub retry: RetryConfig,
    pub check_interval: Duration,
}

impl EngineConfig {
    /// Construct with default retry policy and check interval; callers
    /// override fields directly for anything else.
    pub fn new(
        storage_root: impl Into<PathBuf>,
        base_url: Url,
        platform: Platform,
        host_version: impl Into<String>,
        public_key: [u8; 32],
    ) -> Self {
        Self {
            storage_root: storage_root.into(),
            base_url,
            platform,
            host_version: host_version.into(),
            public_key,
            retry: RetryConfig::default(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}
