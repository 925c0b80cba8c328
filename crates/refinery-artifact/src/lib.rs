//! Typed content-addressed artifact identifiers.
//!
//! Every artifact the refinery produces or reuses (an interpreter runtime, a
//! native dependency pack, a built wheel, a repaired wheel) is addressed by a
//! stable digest computed from the canonical JSON serialization of its key
//! structure. Two keys that serialize to identical bytes always produce
//! identical digests, across releases and platforms.

use std::fmt::{Display, Formatter};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod key;

pub use key::{PackKey, RepairKey, RuntimeKey, WheelKey};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to serialize artifact key")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to read `{0}` while computing its digest")]
    Io(String, #[source] std::io::Error),
}

/// The kind of a content-addressed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Runtime,
    Pack,
    Wheel,
    Repair,
}

impl Display for ArtifactType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime => f.write_str("runtime"),
            Self::Pack => f.write_str("pack"),
            Self::Wheel => f.write_str("wheel"),
            Self::Repair => f.write_str("repair"),
        }
    }
}

/// A tagged (type, digest) pair identifying one artifact.
///
/// Serialized on the wire as `{"type": "wheel", "digest": "sha256:..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub digest: String,
}

impl ArtifactId {
    pub fn runtime(key: &RuntimeKey) -> Result<Self, Error> {
        Ok(Self {
            kind: ArtifactType::Runtime,
            digest: key.digest()?,
        })
    }

    pub fn pack(key: &PackKey) -> Result<Self, Error> {
        Ok(Self {
            kind: ArtifactType::Pack,
            digest: key.digest()?,
        })
    }

    pub fn wheel(key: &WheelKey) -> Result<Self, Error> {
        Ok(Self {
            kind: ArtifactType::Wheel,
            digest: key.digest()?,
        })
    }

    pub fn repair(key: &RepairKey) -> Result<Self, Error> {
        Ok(Self {
            kind: ArtifactType::Repair,
            digest: key.digest()?,
        })
    }

    /// The hex portion of the digest, without the `sha256:` prefix.
    pub fn hex(&self) -> &str {
        self.digest.strip_prefix("sha256:").unwrap_or(&self.digest)
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.digest)
    }
}

/// Compute `sha256:<hex>` over a byte slice.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Compute `sha256:<hex>` over the contents of a file, streaming.
pub fn sha256_file(path: &Path) -> Result<String, Error> {
    let io_err = |err| Error::Io(path.display().to_string(), err);
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Digest the canonical JSON bytes of a serializable key.
pub(crate) fn canonical_digest<K: Serialize>(key: &K) -> Result<String, Error> {
    let bytes = serde_json::to_vec(key)?;
    Ok(sha256_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn artifact_id_round_trips_through_json() {
        let id = ArtifactId {
            kind: ArtifactType::Wheel,
            digest: "sha256:abc123".to_string(),
        };
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"type":"wheel","digest":"sha256:abc123"}"#);
        let back: ArtifactId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hex_strips_prefix() {
        let id = ArtifactId {
            kind: ArtifactType::Pack,
            digest: "sha256:deadbeef".to_string(),
        };
        assert_eq!(id.hex(), "deadbeef");
    }

    #[test]
    fn byte_and_file_digests_agree() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"refinery artifact bytes").unwrap();
        let from_file = sha256_file(file.path()).unwrap();
        let from_bytes = sha256_bytes(b"refinery artifact bytes");
        assert_eq!(from_file, from_bytes);
        assert!(from_file.starts_with("sha256:"));
    }
}
