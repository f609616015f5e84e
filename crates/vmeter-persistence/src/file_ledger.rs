//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{CounterKey, CounterLedger, LedgerEntry};
use crate::snapshot::{load_snapshot_if_present, save_snapshot, verify_snapshot};
use crate::{PersistenceError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    entries: BTreeMap<CounterKey, LedgerEntry>,
}

/// Ledger kept in a single snapshot file shared by all counters.
///
/// Every save rewrites the whole document through [`save_snapshot`], so the
/// file on disk always holds a consistent set of entries. Writers are
/// serialized by one mutex; readers are served from memory and only see an
/// entry once it is on disk.
///
/// An open ledger holds an exclusive advisory lock on `<path>.lock` until it
/// is dropped. A second [`FileLedger::open`] on the same path, in this or any
/// other process, fails with [`PersistenceError::Locked`] instead of
/// overwriting the owner's document from a stale copy.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    entries: RwLock<BTreeMap<CounterKey, LedgerEntry>>,
    write_lock: Mutex<()>,
    _owner: File,
}

impl FileLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger; a file
    /// that fails its integrity check is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let owner = lock_owner(&path)?;
        let document: LedgerDocument = load_snapshot_if_present(&path)?.unwrap_or_default();
        debug!(path = %path.display(), entries = document.entries.len(), "counter ledger opened");
        Ok(Self {
            path,
            entries: RwLock::new(document.entries),
            write_lock: Mutex::new(()),
            _owner: owner,
        })
    }

    /// Location of the ledger document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` if the document at `path` exists and passes its integrity check.
    pub fn verify(path: &Path) -> bool {
        verify_snapshot::<LedgerDocument>(path)
    }

    /// Entries of the document at `path` without taking ownership of it.
    ///
    /// Snapshots are replaced by rename, so this is safe while another
    /// process holds the ledger open.
    pub fn read_entries(path: &Path) -> Result<Vec<(CounterKey, LedgerEntry)>> {
        let document: LedgerDocument = load_snapshot_if_present(path)?.unwrap_or_default();
        Ok(document.entries.into_iter().collect())
    }

    fn write_with<F>(&self, mutate: F) -> Result<Option<LedgerEntry>>
    where
        F: FnOnce(&mut BTreeMap<CounterKey, LedgerEntry>) -> Option<LedgerEntry>,
    {
        let _guard = self.write_lock.lock();
        let mut next = self.entries.read().clone();
        let previous = mutate(&mut next);
        let document = LedgerDocument { entries: next };
        save_snapshot(&document, &self.path)?;
        *self.entries.write() = document.entries;
        Ok(previous)
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("ledger"));
    name.push(".lock");
    path.with_file_name(name)
}

fn lock_owner(path: &Path) -> Result<File> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            Err(PersistenceError::Locked(path.to_path_buf()))
        }
        Err(err) => Err(err.into()),
    }
}

impl CounterLedger for FileLedger {
    fn load(&self, key: &CounterKey) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.read().get(key).copied())
    }

    fn save(&self, key: &CounterKey, entry: &LedgerEntry) -> Result<()> {
        self.write_with(|entries| entries.insert(key.clone(), *entry))?;
        Ok(())
    }

    fn reset(
        &self,
        key: &CounterKey,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<LedgerEntry>> {
        self.write_with(|entries| entries.insert(key.clone(), LedgerEntry::zeroed(at)))
    }

    fn entries(&self) -> Result<Vec<(CounterKey, LedgerEntry)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), *entry))
            .collect())
    }
}
