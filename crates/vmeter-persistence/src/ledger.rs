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
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{PersistenceError, Result};

/// Identifies one bidirectional energy counter: the polled device plus the
/// counter within it (e.g. grid meter, battery).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CounterKey {
    device_id: String,
    counter_id: String,
}

impl CounterKey {
    /// Build a key from its two parts. Both must be non-empty and the device
    /// part must not contain `/`, otherwise the stored form would parse back
    /// into a different key.
    pub fn new(device_id: impl Into<String>, counter_id: impl Into<String>) -> Result<Self> {
        let device_id = device_id.into();
        let counter_id = counter_id.into();
        if device_id.is_empty() || counter_id.is_empty() || device_id.contains('/') {
            return Err(PersistenceError::InvalidKey(format!("{device_id}/{counter_id}")));
        }
        Ok(Self {
            device_id,
            counter_id,
        })
    }

    /// Device part of the key.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Counter part of the key.
    pub fn counter_id(&self) -> &str {
        &self.counter_id
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.counter_id)
    }
}

impl FromStr for CounterKey {
    type Err = PersistenceError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.split_once('/') {
            Some((device, counter)) => Self::new(device, counter),
            None => Err(PersistenceError::InvalidKey(raw.to_owned())),
        }
    }
}

impl TryFrom<String> for CounterKey {
    type Error = PersistenceError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<CounterKey> for String {
    fn from(key: CounterKey) -> Self {
        key.to_string()
    }
}

/// Last persisted state of a counter. Always written as a whole so the
/// timestamp and the totals stay in step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Instant of the sample that produced these totals.
    pub last_timestamp: DateTime<Utc>,
    /// Cumulative imported energy in Wh.
    pub imported_wh: f64,
    /// Cumulative exported energy in Wh.
    pub exported_wh: f64,
}

impl LedgerEntry {
    /// Entry with explicit totals.
    pub fn new(last_timestamp: DateTime<Utc>, imported_wh: f64, exported_wh: f64) -> Self {
        Self {
            last_timestamp,
            imported_wh,
            exported_wh,
        }
    }

    /// Entry with both totals at zero.
    pub fn zeroed(last_timestamp: DateTime<Utc>) -> Self {
        Self::new(last_timestamp, 0.0, 0.0)
    }
}

/// Durable key to [`LedgerEntry`] mapping.
///
/// `save` must be atomic with respect to concurrent `load`s of the same key:
/// a reader observes either the previous or the new entry, never a mix.
pub trait CounterLedger: Send + Sync + fmt::Debug {
    /// Last saved entry for `key`, `None` when the key was never saved.
    fn load(&self, key: &CounterKey) -> Result<Option<LedgerEntry>>;

    /// Replace the entry for `key`.
    fn save(&self, key: &CounterKey, entry: &LedgerEntry) -> Result<()>;

    /// Zero both totals of `key` (meter replacement) and return the previous entry.
    fn reset(&self, key: &CounterKey, at: DateTime<Utc>) -> Result<Option<LedgerEntry>> {
        let previous = self.load(key)?;
        self.save(key, &LedgerEntry::zeroed(at))?;
        Ok(previous)
    }

    /// Every stored entry ordered by key.
    fn entries(&self) -> Result<Vec<(CounterKey, LedgerEntry)>>;
}

/// Process-local ledger. Survives nothing but is handy for tests and for
/// deployments that take their totals from device registers.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<BTreeMap<CounterKey, LedgerEntry>>,
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// `true` if nothing was saved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CounterLedger for MemoryLedger {
    fn load(&self, key: &CounterKey) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.read().get(key).copied())
    }

    fn save(&self, key: &CounterKey, entry: &LedgerEntry) -> Result<()> {
        self.entries.write().insert(key.clone(), *entry);
        Ok(())
    }

    fn reset(&self, key: &CounterKey, at: DateTime<Utc>) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries
            .write()
            .insert(key.clone(), LedgerEntry::zeroed(at)))
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
