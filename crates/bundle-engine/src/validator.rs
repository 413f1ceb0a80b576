//! Pre-launch validator.
//!
//! Runs outside any write scope: it only reads. A host embeds this before
//! launching a prepared bundle, to decide whether the installed version
//! directory is actually safe to hand to the classloader/launcher.

use crate::error::Result;
use crate::events::ValidationProgress;
use crate::manifest::BundleManifest;
use crate::platform::Platform;
use crate::signature::SignatureVerifier;
use crate::storage::{StorageManager, VerificationFailure};

/// Outcome of one validation pass.
#[derive(Debug)]
pub enum ValidationResult {
    NoBundle,
    Valid(BundleManifest),
    Failed {
        reason: String,
        failures: Vec<VerificationFailure>,
    },
    HostTooOld {
        current: String,
        required: String,
        update_url: Option<String>,
    },
}

/// Load, verify, and integrity-check the installed manifest, reporting
/// progress via `on_progress`.
pub async fn validate(
    storage: &StorageManager,
    verifier: &SignatureVerifier,
    platform: Platform,
    host_version: &str,
    mut on_progress: impl FnMut(ValidationProgress),
) -> Result<ValidationResult> {
    on_progress(ValidationProgress::LoadingManifest);
    let raw = match storage.load_installed_manifest_raw().await? {
        Some(raw) => raw,
        None => return Ok(ValidationResult::NoBundle),
    };

    on_progress(ValidationProgress::VerifyingSignature);
    let signature_ok = verifier.verify_raw_json(&raw).unwrap_or(false);
    if !signature_ok {
        return Ok(ValidationResult::Failed {
            reason: "signature".into(),
            failures: Vec::new(),
        });
    }

    let manifest: BundleManifest = serde_json::from_slice(&raw)?;

    if !manifest.host_version_satisfies(host_version)? {
        return Ok(ValidationResult::HostTooOld {
            current: host_version.to_string(),
            required: manifest.min_host_version.clone(),
            update_url: manifest.host_update_url.clone(),
        });
    }

    let total = manifest.files_for_platform(platform).len() as u32;
    on_progress(ValidationProgress::VerifyingFiles {
        done: 0,
        total,
        percent: 0.0,
    });
    let failures = storage.verify_version(&manifest, platform).await?;
    on_progress(ValidationProgress::VerifyingFiles {
        done: total,
        total,
        percent: 100.0,
    });
    if !failures.is_empty() {
        return Ok(ValidationResult::Failed {
            reason: "integrity".into(),
            failures,
        });
    }

    on_progress(ValidationProgress::Complete);
    Ok(ValidationResult::Valid(manifest))
}
