//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable storage for simulated energy counters.
//!
//! The [`CounterLedger`] trait is the seam between the integrator and its
//! backend; [`MemoryLedger`] and [`FileLedger`] are the shipped
//! implementations. Snapshots written by this crate carry a sha256 hash of
//! their payload and are replaced through an atomic rename.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a snapshot fails integrity verification.
    #[error("snapshot hash mismatch in {0}")]
    HashMismatch(std::path::PathBuf),
    /// Snapshot written by an incompatible format version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// Ledger file already opened by another owner.
    #[error("ledger {0} is held open by another process")]
    Locked(std::path::PathBuf),
    /// Counter key that cannot be parsed.
    #[error("invalid counter key '{0}': expected <device>/<counter>")]
    InvalidKey(String),
}

pub mod audit;
pub mod file_ledger;
pub mod ledger;
pub mod metrics;
pub mod snapshot;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditReader};
pub use file_ledger::FileLedger;
pub use ledger::{CounterKey, CounterLedger, LedgerEntry, MemoryLedger};
pub use metrics::PersistenceMetrics;
pub use snapshot::{load_snapshot, save_snapshot, verify_snapshot, SNAPSHOT_VERSION};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_key_error_names_expected_format() {
        let err = PersistenceError::InvalidKey("nodelimiter".into());
        assert_eq!(
            format!("{err}"),
            "invalid counter key 'nodelimiter': expected <device>/<counter>"
        );
    }
}
