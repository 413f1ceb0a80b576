//! Ed25519 manifest signature verification.
//!
//! Two paths are offered: a raw-JSON fast path that verifies the exact
//! bytes received (forward-compatible with unknown trailing fields) and
//! a round-trip fallback that re-canonicalises the parsed manifest
//! before verifying.

use crate::error::{BundleEngineError, Result};
use crate::manifest::BundleManifest;
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// The fixed suffix that precedes a signed manifest's closing brace once
/// `signature` has been appended.
const SIGNATURE_FIELD_PREFIX: &str = ",\"signature\":\"ed25519:";

/// Holds a public Ed25519 key decoded once at construction.
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Construct from a raw 32-byte Ed25519 public key.
    pub fn from_public_key_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| BundleEngineError::validation(format!("invalid public key: {e}")))?;
        Ok(Self::new(key))
    }

    /// Verify a manifest, preferring the raw-JSON fast path and falling
    /// back to the round-trip path when the raw bytes are unusable (e.g.
    /// pretty-printed legacy documents). Returns `false` rather than
    /// propagating errors for malformed input.
    pub fn verify(&self, raw: &[u8], manifest: &BundleManifest) -> bool {
        if let Some(ok) = self.verify_raw_json(raw) {
            if ok {
                return true;
            }
        }
        self.verify_round_trip(manifest)
    }

    /// Raw-JSON fast path: strip the trailing `,"signature":"ed25519:<b64>"`
    /// field (if present in that exact position) and verify the signature
    /// over everything before it plus the closing brace. Returns `None` if
    /// the document does not end in the expected shape (caller should fall
    /// back), `Some(bool)` otherwise.
    pub fn verify_raw_json(&self, raw: &[u8]) -> Option<bool> {
        let text = std::str::from_utf8(raw).ok()?;
        let trimmed = text.trim_end();
        let body = trimmed.strip_suffix('}')?;

        let sig_start = body.rfind(SIGNATURE_FIELD_PREFIX)?;
        let before_sig = &body[..sig_start];
        let sig_field = &body[sig_start + SIGNATURE_FIELD_PREFIX.len()..];
        let b64_sig = sig_field.strip_suffix('"')?;

        let signature = decode_signature(b64_sig)?;
        let signed_bytes = format!("{before_sig}}}");
        Some(self.key.verify(signed_bytes.as_bytes(), &signature).is_ok())
    }

    /// Round-trip fallback: re-serialise the parsed manifest using the
    /// canonical encoder and verify against that.
    pub fn verify_round_trip(&self, manifest: &BundleManifest) -> bool {
        let Some(signature) = manifest
            .signature
            .as_ref()
            .and_then(|s| decode_signature(s.strip_prefix("ed25519:").unwrap_or(s)))
        else {
            return false;
        };
        let canonical = manifest.to_canonical_signed_bytes();
        self.key.verify(&canonical, &signature).is_ok()
    }
}

fn decode_signature(b64: &str) -> Option<Signature> {
    let raw = general_purpose::STANDARD.decode(b64.as_bytes()).ok()?;
    let array: [u8; 64] = raw.try_into().ok()?;
    Some(Signature::from_bytes(&array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BundleFile, BundleManifest, PlatformBundle};
    use crate::platform::Platform;
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::BTreeMap;

    fn sample_manifest() -> BundleManifest {
        BundleManifest {
            schema_version: 1,
            build_number: 1,
            created_at: "2026-01-01T00:00:00Z".into(),
            min_host_version: "1.0.0".into(),
            host_update_url: None,
            files: vec![BundleFile {
                path: "app.bin".into(),
                hash: crate::hash::ContentHash::sha256(crate::hash::EMPTY_SHA256_HEX),
                size: 0,
                os: None,
                arch: None,
            }],
            main_entry: "com.example.Main".into(),
            archives: {
                let mut m = BTreeMap::new();
                m.insert(
                    Platform::current(),
                    PlatformBundle {
                        archive_path: "archive.tar.gz".into(),
                        size: 100,
                    },
                );
                m
            },
            signature: None,
        }
    }

    #[test]
    fn round_trip_law_holds() {
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let verifying_key = signing_key.verifying_key();

        let mut manifest = sample_manifest();
        let unsigned = manifest.to_canonical_signed_bytes();
        let signature = signing_key.sign(&unsigned);
        manifest.signature = Some(format!(
            "ed25519:{}",
            general_purpose::STANDARD.encode(signature.to_bytes())
        ));

        let verifier = SignatureVerifier::new(verifying_key);
        assert!(verifier.verify_round_trip(&manifest));

        // Re-serialise then re-parse: signature still verifies.
        let raw = manifest.to_distribution_json();
        let reparsed: BundleManifest = serde_json::from_slice(&raw).unwrap();
        assert!(verifier.verify_round_trip(&reparsed));
    }

    #[test]
    fn forward_compatible_unknown_trailing_field() {
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        let verifying_key = signing_key.verifying_key();

        let manifest = sample_manifest();
        let mut unsigned = manifest.to_canonical_signed_bytes();
        // Simulate a newer publisher appending a field the old client does
        // not know about, before signing.
        assert!(unsigned.ends_with(b"}"));
        unsigned.truncate(unsigned.len() - 1);
        unsigned.extend_from_slice(br#","futureField":"x"}"#);

        let signature = signing_key.sign(&unsigned);
        let sig_b64 = general_purpose::STANDARD.encode(signature.to_bytes());

        let mut distributed = unsigned.clone();
        distributed.truncate(distributed.len() - 1);
        distributed.extend_from_slice(format!(",\"signature\":\"ed25519:{sig_b64}\"}}").as_bytes());

        let verifier = SignatureVerifier::new(verifying_key);
        assert_eq!(verifier.verify_raw_json(&distributed), Some(true));
    }

    #[test]
    fn tampered_payload_fails() {
        let signing_key = SigningKey::from_bytes(&[1u8; 32]);
        let verifying_key = signing_key.verifying_key();

        let mut manifest = sample_manifest();
        let unsigned = manifest.to_canonical_signed_bytes();
        let signature = signing_key.sign(&unsigned);
        manifest.signature = Some(format!(
            "ed25519:{}",
            general_purpose::STANDARD.encode(signature.to_bytes())
        ));
        manifest.build_number = 2;

        let verifier = SignatureVerifier::new(verifying_key);
        assert!(!verifier.verify_round_trip(&manifest));
    }

    #[test]
    fn malformed_base64_maps_to_false_not_panic() {
        let verifying_key = SigningKey::from_bytes(&[1u8; 32]).verifying_key();
        let verifier = SignatureVerifier::new(verifying_key);
        let raw = br#"{"a":1,"signature":"ed25519:not-base64!!!"}"#;
        assert_eq!(verifier.verify_raw_json(raw), Some(false));
    }
}
