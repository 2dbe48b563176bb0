//! Snapshot persistence
//!
//! Binary snapshots are bincode-encoded graphs written next to a JSON
//! checksum sidecar (`<path>.checksum`). Loading verifies the full corruption
//! matrix: missing snapshot, missing sidecar, unparseable sidecar, size
//! mismatch, and digest mismatch all fail with `IndexError::Corrupted`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::hnsw::HnswGraph;

/// Bump when the encoded graph layout changes.
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 1;

/// On-disk form of the graph.
#[derive(Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub schema_version: u16,
    pub graph: HnswGraph,
}

/// Checksum sidecar written next to the snapshot.
///
/// Field names match the persisted JSON contract consumed by external
/// diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumSidecar {
    /// Hex SHA-256 of the snapshot file
    pub checksum: String,
    /// ISO-8601 write time
    pub timestamp: String,
    /// Snapshot size in bytes
    pub file_size: u64,
    /// Milliseconds spent building the persisted graph
    pub build_time_ms: u64,
    /// Live vectors in the snapshot
    pub vector_count: usize,
}

/// Sidecar path for a snapshot path.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".checksum");
    PathBuf::from(os)
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write a snapshot and its sidecar.
pub(crate) fn save(path: &Path, graph: &HnswGraph, build_time_ms: u64) -> Result<ChecksumSidecar> {
    let snapshot = Snapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        graph: graph.clone(),
    };

    let encoded = bincode::serialize(&snapshot).map_err(|e| IndexError::Encode(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, &encoded)?;

    let sidecar = ChecksumSidecar {
        checksum: sha256_hex(&encoded),
        timestamp: Utc::now().to_rfc3339(),
        file_size: encoded.len() as u64,
        build_time_ms,
        vector_count: graph.live_count(),
    };

    let sidecar_json = serde_json::to_string_pretty(&sidecar)?;
    fs::write(sidecar_path(path), sidecar_json)?;

    info!(
        "Saved index snapshot: {} vectors, {} bytes at {:?}",
        sidecar.vector_count, sidecar.file_size, path
    );

    Ok(sidecar)
}

/// Load and verify a snapshot.
pub(crate) fn load(path: &Path) -> Result<(HnswGraph, ChecksumSidecar)> {
    if !path.exists() {
        return Err(IndexError::Corrupted(format!(
            "snapshot missing: {}",
            path.display()
        )));
    }

    let sidecar_file = sidecar_path(path);
    if !sidecar_file.exists() {
        return Err(IndexError::Corrupted(format!(
            "checksum sidecar missing: {}",
            sidecar_file.display()
        )));
    }

    let sidecar_bytes = fs::read(&sidecar_file)?;
    let sidecar: ChecksumSidecar = serde_json::from_slice(&sidecar_bytes)
        .map_err(|e| IndexError::Corrupted(format!("checksum sidecar unreadable: {e}")))?;

    let encoded = fs::read(path)?;

    if encoded.len() as u64 != sidecar.file_size {
        return Err(IndexError::Corrupted(format!(
            "size mismatch: snapshot is {} bytes, sidecar recorded {}",
            encoded.len(),
            sidecar.file_size
        )));
    }

    let digest = sha256_hex(&encoded);
    if digest != sidecar.checksum {
        return Err(IndexError::Corrupted(
            "digest mismatch between snapshot and sidecar".to_string(),
        ));
    }

    let snapshot: Snapshot = bincode::deserialize(&encoded)
        .map_err(|e| IndexError::Corrupted(format!("snapshot undecodable: {e}")))?;

    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(IndexError::Corrupted(format!(
            "unsupported snapshot schema version {}",
            snapshot.schema_version
        )));
    }

    debug!(
        "Loaded index snapshot: {} vectors from {:?}",
        snapshot.graph.live_count(),
        path
    );

    Ok((snapshot.graph, sidecar))
}

/// Non-failing integrity probe: true only when the snapshot verifies clean.
pub fn verify_integrity(path: &Path) -> bool {
    load(path).is_ok()
}
