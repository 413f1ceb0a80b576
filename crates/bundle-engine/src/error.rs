/// Convenient result alias for engine operations.
pub type Result<T> = std::result::Result<T, BundleEngineError>;

/// Errors that can occur while storing, downloading, verifying or activating
/// a bundle.
#[derive(thiserror::Error, Debug)]
pub enum BundleEngineError {
    /// Network request failed at the transport level.
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The manifest could not be decoded from JSON.
    #[error("manifest decoding failed: {0}")]
    ManifestDecode(#[from] serde_json::Error),
    /// Raw-JSON and round-trip signature verification both failed.
    #[error("manifest signature invalid")]
    SignatureInvalid,
    /// The manifest has no archive entry for the requested platform.
    #[error("platform {0} is not supported by this manifest")]
    PlatformUnsupported(String),
    /// The manifest's build number is not greater than the installed one.
    #[error("build {offered} is not newer than installed build {installed}")]
    Downgrade { offered: u64, installed: u64 },
    /// The manifest requires a newer host than is configured.
    #[error("host version {current} is older than required {required}")]
    HostTooOld {
        current: String,
        required: String,
        update_url: Option<String>,
    },
    /// A downloaded file's hash did not match the manifest.
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    /// `prepareVersion` required a CAS entry that was never inserted.
    #[error("missing CAS entry for {0}")]
    MissingCasEntry(String),
    /// Strategy computation required a field the manifest omitted.
    #[error("strategy error: {0}")]
    Strategy(String),
    /// Filesystem operation failed.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// A version string failed to parse as semver.
    #[error("invalid version: {0}")]
    Semver(#[from] semver::Error),
    /// Operation cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
    /// Any other internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BundleEngineError {
    /// Helper for wrapping ad-hoc validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        BundleEngineError::Internal(msg.into())
    }

    /// Classify whether this error is worth retrying: transport I/O errors
    /// and HTTP 429/5xx are recoverable, everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        match self {
            BundleEngineError::Network(err) => {
                if let Some(status) = err.status() {
                    status.as_u16() == 429 || status.is_server_error()
                } else {
                    err.is_timeout() || err.is_connect() || err.is_request()
                }
            }
            BundleEngineError::Io(_) => true,
            _ => false,
        }
    }

    /// The stable, caller-facing error kind used by engine `Error` events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BundleEngineError::SignatureInvalid => ErrorKind::SignatureInvalid,
            BundleEngineError::PlatformUnsupported(_) => ErrorKind::PlatformUnsupported,
            BundleEngineError::Downgrade { .. } => ErrorKind::Downgrade,
            BundleEngineError::HostTooOld { .. } => ErrorKind::HostTooOld,
            BundleEngineError::Network(_) => ErrorKind::NetworkError,
            BundleEngineError::HashMismatch { .. } => ErrorKind::HashMismatch,
            BundleEngineError::MissingCasEntry(_) => ErrorKind::MissingCasEntry,
            BundleEngineError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }
}

/// Stable error-kind tags surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SignatureInvalid,
    PlatformUnsupported,
    Downgrade,
    HostTooOld,
    NetworkError,
    HashMismatch,
    MissingCasEntry,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::SignatureInvalid => "SignatureInvalid",
            ErrorKind::PlatformUnsupported => "PlatformUnsupported",
            ErrorKind::Downgrade => "Downgrade",
            ErrorKind::HostTooOld => "HostTooOld",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::HashMismatch => "HashMismatch",
            ErrorKind::MissingCasEntry => "MissingCasEntry",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}
