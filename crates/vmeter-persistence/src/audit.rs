//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Append-only record of administrative ledger changes.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ledger::{CounterKey, LedgerEntry};
use crate::{snapshot::SNAPSHOT_VERSION, PersistenceError, Result};

/// First line of every audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuditHeader {
    version: u16,
    created_at: DateTime<Utc>,
}

/// Administrative change applied to a counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditAction {
    /// Totals zeroed, e.g. after a meter replacement.
    Reset {
        /// Affected counter.
        key: CounterKey,
        /// Entry before the reset, if any.
        previous: Option<LedgerEntry>,
    },
    /// Totals set explicitly, e.g. when migrating from another system.
    Seed {
        /// Affected counter.
        key: CounterKey,
        /// Imported total written.
        imported_wh: f64,
        /// Exported total written.
        exported_wh: f64,
        /// Entry that was overwritten, if any.
        previous: Option<LedgerEntry>,
    },
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the action was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form operator identification.
    pub operator: String,
    /// The recorded action.
    #[serde(flatten)]
    pub action: AuditAction,
}

struct AuditWriter {
    writer: BufWriter<File>,
    next_sequence: u64,
}

/// Append-only audit log shared between callers.
pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<AuditWriter>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Open the log for appending, writing a header if the file is new.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(&path)?.len() == 0;
        let next_sequence = if fresh {
            0
        } else {
            last_sequence(&path)?
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);

        if fresh {
            let header = AuditHeader {
                version: SNAPSHOT_VERSION,
                created_at: Utc::now(),
            };
            writer.write_all(serde_json::to_string(&header)?.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(AuditWriter {
                writer,
                next_sequence,
            }),
        })
    }

    /// Append an action and return its sequence number.
    pub fn append(&self, operator: &str, action: AuditAction) -> Result<u64> {
        let mut inner = self.inner.lock();
        let entry = AuditEntry {
            sequence: inner.next_sequence + 1,
            timestamp: Utc::now(),
            operator: operator.to_owned(),
            action,
        };
        let line = serde_json::to_string(&entry)?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.next_sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0u64;
    for entry in AuditReader::open(path)? {
        match entry {
            Ok(entry) => last = entry.sequence,
            // torn line from an interrupted append
            Err(PersistenceError::Json(_)) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(last)
}

/// Replay the log in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(AuditEntry) -> Result<()>,
{
    let mut count = 0usize;
    for entry in AuditReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over audit entries.
pub struct AuditReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl AuditReader {
    /// Open the log for sequential reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for AuditReader {
    type Item = Result<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(serde_json::from_str(&line).map_err(PersistenceError::from))
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
