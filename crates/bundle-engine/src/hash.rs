//! Streaming SHA-256 hashing with optional progress reporting.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the read buffer used while streaming a file through the hasher.
const CHUNK_SIZE: usize = 64 * 1024;

/// Hash algorithm tag. Only `sha256` is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sha256")
    }
}

/// A tagged content hash, rendered as `"sha256:<hex>"`. Equality is
/// case-insensitive on hex, normalised to lowercase at construction.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    hex: String,
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, hex: impl Into<String>) -> Self {
        Self {
            algorithm,
            hex: hex.into().to_ascii_lowercase(),
        }
    }

    pub fn sha256(hex: impl Into<String>) -> Self {
        Self::new(HashAlgorithm::Sha256, hex)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl PartialEq for ContentHash {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.hex.eq_ignore_ascii_case(&other.hex)
    }
}

impl std::hash::Hash for ContentHash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.algorithm.hash(state);
        self.hex.hash(state);
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed hash string: {s}"))?;
        match algo {
            "sha256" => Ok(ContentHash::sha256(hex)),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.to_string()
    }
}

/// Stream a reader through SHA-256, invoking `on_progress` with the number
/// of bytes read in each chunk.
pub async fn hash_reader_with_progress<R, F>(mut reader: R, mut on_progress: F) -> Result<ContentHash>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        on_progress(n as u64);
    }
    Ok(ContentHash::sha256(hex::encode(hasher.finalize())))
}

/// Stream a reader through SHA-256 without progress reporting.
pub async fn hash_reader<R>(reader: R) -> Result<ContentHash>
where
    R: AsyncRead + Unpin,
{
    hash_reader_with_progress(reader, |_| {}).await
}

/// Hash a file on disk.
pub async fn hash_file(path: &Path) -> Result<ContentHash> {
    let file = tokio::fs::File::open(path).await?;
    hash_reader(file).await
}

/// Hash an in-memory byte buffer.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::sha256(hex::encode(Sha256::digest(data)))
}

/// SHA-256 of the empty input, used as a fixture in tests.
pub const EMPTY_SHA256_HEX: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
