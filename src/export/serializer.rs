//! Binary artifact envelope
//!
//! Plugin state, template checkpoints and ensemble models are bincode
//! payloads wrapped in a [`SerializedArtifact`] carrying magic bytes, a
//! format version, the artifact kind and an FNV-1a checksum.

use crate::error::{PrognosError, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// What an artifact contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Plugin,
    Checkpoint,
    Ensemble,
}

/// Serialized artifact wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedArtifact {
    /// Magic bytes for format detection
    pub magic: [u8; 4],
    pub format_version: u32,
    pub kind: ArtifactKind,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    pub payload: Vec<u8>,
    /// FNV-1a hash of `payload`
    pub checksum: u64,
}

impl SerializedArtifact {
    const MAGIC: [u8; 4] = [b'P', b'R', b'G', b'N'];
    const VERSION: u32 = 1;

    pub fn new(kind: ArtifactKind, payload: Vec<u8>) -> Self {
        let checksum = fnv1a(&payload);
        Self {
            magic: Self::MAGIC,
            format_version: Self::VERSION,
            kind,
            created_at: Utc::now().to_rfc3339(),
            payload,
            checksum,
        }
    }

    pub fn verify_checksum(&self) -> bool {
        fnv1a(&self.payload) == self.checksum
    }
}

/// FNV-1a hash
pub fn fnv1a(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Serialize a value into an enveloped artifact
pub fn encode<T: Serialize>(kind: ArtifactKind, value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let artifact = SerializedArtifact::new(kind, payload);
    Ok(bincode::serialize(&artifact)?)
}

/// Verify and deserialize an enveloped artifact of the expected kind
pub fn decode<T: DeserializeOwned>(kind: ArtifactKind, bytes: &[u8]) -> Result<T> {
    let artifact: SerializedArtifact = bincode::deserialize(bytes)
        .map_err(|e| PrognosError::SerializationError(format!("Failed to read envelope: {}", e)))?;

    if artifact.magic != SerializedArtifact::MAGIC {
        return Err(PrognosError::SerializationError("Unrecognised artifact format".to_string()));
    }
    if artifact.format_version != SerializedArtifact::VERSION {
        return Err(PrognosError::SerializationError(format!(
            "Unsupported format version {}",
            artifact.format_version
        )));
    }
    if artifact.kind != kind {
        return Err(PrognosError::SerializationError(format!(
            "Expected {:?} artifact, found {:?}",
            kind, artifact.kind
        )));
    }
    if !artifact.verify_checksum() {
        return Err(PrognosError::SerializationError(
            "Checksum verification failed - artifact may be corrupted".to_string(),
        ));
    }

    bincode::deserialize(&artifact.payload)
        .map_err(|e| PrognosError::SerializationError(format!("Failed to deserialize: {}", e)))
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

/// Write to a temporary sibling, then rename over `path`.
///
/// A failed attempt is retried once with a fresh temporary name; a second
/// failure is a [`PrognosError::PersistenceError`].
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut last_error = String::new();
    for attempt in 0..2 {
        let tmp = temp_sibling(path);
        match fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                warn!(path = %path.display(), attempt, error = %e, "atomic write failed");
                last_error = e.to_string();
            }
        }
    }
    Err(PrognosError::PersistenceError(format!(
        "could not write {}: {}",
        path.display(),
        last_error
    )))
}
