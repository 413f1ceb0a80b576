//! Bundle manifest data model and canonical JSON encoding.
//!
//! A multi-file, multi-platform schema with an explicit canonical
//! encoder rather than relying on `serde_json::to_vec` directly — field
//! order and default-omission both have to be exact for signatures to
//! verify across platforms and serializer versions.

use crate::error::Result;
use crate::hash::ContentHash;
use crate::platform::{Arch, Os, Platform};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single file entry within a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    /// Relative, forward-slash separated path inside a version directory.
    pub path: String,
    /// Content hash of the file.
    pub hash: ContentHash,
    /// Non-negative byte count.
    pub size: u64,
    /// Optional OS constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<Os>,
    /// Optional architecture constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Arch>,
}

impl BundleFile {
    /// A file applies to platform `p` iff both constraints are absent or
    /// match `p`.
    pub fn applies_to(&self, p: Platform) -> bool {
        self.os.map(|os| os == p.os).unwrap_or(true)
            && self.arch.map(|arch| arch == p.arch).unwrap_or(true)
    }
}

/// Per-platform archive pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformBundle {
    /// Relative URL/path of the full archive for that platform.
    pub archive_path: String,
    /// Archive byte length — drives strategy choice, not a sum of contents.
    pub size: u64,
}

/// The signed, versioned bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub schema_version: u32,
    /// Monotone build number, `>= 1`.
    pub build_number: u64,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    pub min_host_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_update_url: Option<String>,
    /// Ordered; order must be preserved for canonical signing.
    pub files: Vec<BundleFile>,
    pub main_entry: String,
    /// Platform-id -> archive pointer. Key order is irrelevant to the
    /// signature; the canonical encoder uses a fixed (sorted, via
    /// `BTreeMap`) order.
    pub archives: BTreeMap<Platform, PlatformBundle>,
    /// `"ed25519:<base64>"`. Absent/`None` when unsigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl BundleManifest {
    /// A manifest is *supported on platform P* iff `P` has an archive entry.
    pub fn supports_platform(&self, platform: Platform) -> bool {
        self.archives.contains_key(&platform)
    }

    /// Files that apply to the given platform, in manifest order.
    pub fn files_for_platform(&self, platform: Platform) -> Vec<&BundleFile> {
        self.files.iter().filter(|f| f.applies_to(platform)).collect()
    }

    pub fn archive_for(&self, platform: Platform) -> Option<&PlatformBundle> {
        self.archives.get(&platform)
    }

    /// `true` if `hostVersion` satisfies this manifest's `minHostVersion`,
    /// compared as `semver::Version`s.
    pub fn host_version_satisfies(&self, host_version: &str) -> Result<bool> {
        let host = Version::parse(host_version)?;
        let min = Version::parse(&self.min_host_version)?;
        Ok(host >= min)
    }

    /// Canonical JSON bytes of the manifest with `signature` omitted — the
    /// payload that is actually signed.
    pub fn to_canonical_signed_bytes(&self) -> Vec<u8> {
        encode_canonical(self, false)
    }

    /// Canonical JSON with `signature` appended as the final field, as
    /// distributed to clients.
    pub fn to_distribution_json(&self) -> Vec<u8> {
        encode_canonical(self, true)
    }
}

fn encode_canonical(manifest: &BundleManifest, include_signature: bool) -> Vec<u8> {
    let mut out = String::from("{");
    out.push_str(&format!("\"schemaVersion\":{}", manifest.schema_version));
    out.push_str(&format!(",\"buildNumber\":{}", manifest.build_number));
    out.push_str(&format!(
        ",\"createdAt\":{}",
        json_string(&manifest.created_at)
    ));
    out.push_str(&format!(
        ",\"minHostVersion\":{}",
        json_string(&manifest.min_host_version)
    ));
    if let Some(url) = &manifest.host_update_url {
        out.push_str(&format!(",\"hostUpdateUrl\":{}", json_string(url)));
    }

    out.push_str(",\"files\":[");
    for (i, file) in manifest.files.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('{');
        out.push_str(&format!("\"path\":{}", json_string(&file.path)));
        out.push_str(&format!(",\"hash\":{}", json_string(&file.hash.to_string())));
        out.push_str(&format!(",\"size\":{}", file.size));
        if let Some(os) = file.os {
            out.push_str(&format!(",\"os\":{}", json_string(&os.to_string())));
        }
        if let Some(arch) = file.arch {
            out.push_str(&format!(",\"arch\":{}", json_string(&arch.to_string())));
        }
        out.push('}');
    }
    out.push(']');

    out.push_str(&format!(
        ",\"mainEntry\":{}",
        json_string(&manifest.main_entry)
    ));

    out.push_str(",\"archives\":{");
    for (i, (platform, bundle)) in manifest.archives.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{}:", json_string(&platform.to_string())));
        out.push('{');
        out.push_str(&format!(
            "\"archivePath\":{}",
            json_string(&bundle.archive_path)
        ));
        out.push_str(&format!(",\"size\":{}", bundle.size));
        out.push('}');
    }
    out.push('}');

    if include_signature {
        if let Some(sig) = &manifest.signature {
            out.push_str(&format!(",\"signature\":{}", json_string(sig)));
        }
    }

    out.push('}');
    out.into_bytes()
}

/// Minimal JSON string escaper sufficient for the ASCII-safe manifest
/// fields this encoder emits (paths, versions, timestamps, platform ids).
fn json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
