//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Key-partitioned locking primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Lazily created per-key slots.
///
/// The outer map is locked only long enough to find or insert a slot; work on
/// one key never blocks another key.
#[derive(Debug)]
pub struct KeyedLocks<K, V> {
    slots: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for KeyedLocks<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedLocks<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `key`, created on first use.
    pub fn slot(&self, key: &K) -> Arc<V> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(V::default());
        slots.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.slots.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Orders durable writes of one key by revision.
///
/// State is computed under a short lock and tagged with a revision; the write
/// happens afterwards under the gate. A revision older than the last committed
/// one is skipped, so a slow writer can never overwrite newer data.
#[derive(Debug, Default)]
pub struct WriteGate {
    committed: Mutex<u64>,
}

impl WriteGate {
    /// Run `write` for `revision`. Returns `Ok(false)` when a newer revision
    /// was already committed and the write was skipped.
    pub fn commit<E, F>(&self, revision: u64, write: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut committed = self.committed.lock();
        if *committed > revision {
            return Ok(false);
        }
        write()?;
        *committed = revision;
        Ok(true)
    }

    pub fn committed(&self) -> u64 {
        *self.committed.lock()
    }
}
