//! Content-addressed bundle storage, update and verification engine.
//!
//! Delivers, verifies, and activates versioned application bundles: a
//! content-addressable file store (CAS), a multi-version on-disk layout
//! with crash-safe activation, a signed-manifest verification pipeline, a
//! download-strategy decider, a retry/backoff executor, a background
//! update state machine with ordered event emission, and a cleanup
//! collector for superseded content.
//!
//! ```ignore
//! use bundle_engine::{EngineConfig, StorageManager, DownloadManager, SignatureVerifier, UpdateEngine};
//!
//! # async fn demo(config: EngineConfig) -> bundle_engine::Result<()> {
//! let storage = StorageManager::new(&config.storage_root).await?;
//! let download = DownloadManager::new(config.base_url.clone());
//! let verifier = SignatureVerifier::from_public_key_bytes(&config.public_key)?;
//! let engine = UpdateEngine::new(
//!     storage,
//!     download,
//!     verifier,
//!     config.platform,
//!     config.host_version.clone(),
//!     config.retry,
//! );
//! engine.run_cycle(&|event| tracing::info!(?event, "update event")).await;
//! # Ok(())
//! # }
//! ```

mod background;
mod cas;
mod cleanup;
mod config;
mod download;
mod engine;
mod error;
mod events;
mod hash;
mod linker;
mod manifest;
mod platform;
mod retry;
mod signature;
mod storage;
mod strategy;
mod validator;

pub use background::run as run_background_loop;
pub use cas::ContentAddressedStore;
pub use config::{EngineConfig, CONNECT_TIMEOUT, DEFAULT_CHECK_INTERVAL, READ_TIMEOUT, WRITE_TIMEOUT};
pub use download::{DownloadManager, DownloadResult, FileTransport, HttpTransport, Transport};
pub use engine::UpdateEngine;
pub use error::{BundleEngineError, ErrorKind, Result};
pub use events::{CleanupResult, DownloadProgress, UpdateEvent, UpdateInfo, ValidationProgress};
pub use hash::{hash_bytes, hash_file, ContentHash, HashAlgorithm, EMPTY_SHA256_HEX};
pub use manifest::{BundleFile, BundleManifest, PlatformBundle};
pub use platform::{Arch, Os, Platform};
pub use retry::{run_with_retry, BackingOff, RetryConfig};
pub use signature::SignatureVerifier;
pub use storage::{StorageManager, VerificationFailure, VerificationFailureReason, WriteScope};
pub use validator::{validate, ValidationResult};
