//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Integrity-checked JSON snapshots.
//!
//! A snapshot is written to a temporary file next to its target and renamed
//! into place, so readers see either the previous or the new document. The
//! payload is serialized once and embedded verbatim; its hash covers exactly
//! those bytes, so verification never depends on re-encoding parsed values.
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::{PersistenceError, Result};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
    payload: Box<RawValue>,
}

/// Persist `payload` to `path`, replacing any previous snapshot atomically.
pub fn save_snapshot<T: Serialize>(payload: &T, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let payload = serde_json::value::to_raw_value(payload)?;
    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
        hash: compute_hash(payload.get()),
        payload,
    };

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, &envelope)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Load a snapshot and verify its hash.
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let envelope = load_envelope(path)?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(envelope.version));
    }
    let raw = envelope.payload.get();
    if envelope.hash != compute_hash(raw) {
        return Err(PersistenceError::HashMismatch(path.to_path_buf()));
    }
    Ok(serde_json::from_str(raw)?)
}

/// Like [`load_snapshot`], but a missing file yields `None`.
pub fn load_snapshot_if_present<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match load_snapshot(path) {
        Ok(payload) => Ok(Some(payload)),
        Err(PersistenceError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Verify the integrity of a snapshot.
pub fn verify_snapshot<T: DeserializeOwned>(path: &Path) -> bool {
    load_snapshot::<T>(path).is_ok()
}

fn load_envelope(path: &Path) -> Result<SnapshotEnvelope> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn compute_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}
