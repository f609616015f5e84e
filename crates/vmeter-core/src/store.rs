//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Latest-value store for component states."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Holds the most recent [`ComponentState`] per component. Device adapters
//! write through a [`ValueSlot`], the control loop reads with
//! [`ValueStore::get`]. No history is kept.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use vmeter_persistence::snapshot::{load_snapshot, save_snapshot};
use vmeter_persistence::{PersistenceError, PersistenceMetrics};
use walkdir::WalkDir;

use crate::error::{DegradedTarget, PersistenceDegraded};
use crate::fault::FaultTracker;
use crate::locks::WriteGate;
use crate::state::{ComponentId, ComponentState};

/// Durable mirror of the value store.
pub trait StateSink: Send + Sync + fmt::Debug {
    fn persist(&self, id: ComponentId, state: &ComponentState) -> vmeter_persistence::Result<()>;

    /// Every stored state, used to repopulate the store after a restart.
    fn load_all(&self) -> vmeter_persistence::Result<Vec<(ComponentId, ComponentState)>>;
}

const STATE_FILE_PREFIX: &str = "component-";
const STATE_FILE_SUFFIX: &str = ".json";

/// One integrity-checked snapshot file per component.
#[derive(Debug, Clone)]
pub struct JsonStateSink {
    directory: PathBuf,
}

impl JsonStateSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: ComponentId) -> PathBuf {
        self.directory
            .join(format!("{STATE_FILE_PREFIX}{id}{STATE_FILE_SUFFIX}"))
    }
}

fn component_id_from_file(name: &str) -> Option<ComponentId> {
    name.strip_prefix(STATE_FILE_PREFIX)?
        .strip_suffix(STATE_FILE_SUFFIX)?
        .parse()
        .ok()
}

impl StateSink for JsonStateSink {
    fn persist(&self, id: ComponentId, state: &ComponentState) -> vmeter_persistence::Result<()> {
        save_snapshot(state, &self.path_for(id))
    }

    fn load_all(&self) -> vmeter_persistence::Result<Vec<(ComponentId, ComponentState)>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut states = Vec::new();
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| PersistenceError::Io(err.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(component_id_from_file) else {
                continue;
            };
            match load_snapshot::<ComponentState>(entry.path()) {
                Ok(state) => states.push((id, state)),
                Err(err) => {
                    warn!(component = %id, path = %entry.path().display(), error = %err, "skipping unreadable component state");
                }
            }
        }
        states.sort_by_key(|(id, _)| *id);
        Ok(states)
    }
}

#[derive(Debug, Default)]
struct SlotCell {
    value: RwLock<Option<ComponentState>>,
    revision: Mutex<u64>,
    gate: WriteGate,
}

/// Latest state per component, optionally mirrored to a [`StateSink`].
#[derive(Debug, Default)]
pub struct ValueStore {
    slots: RwLock<HashMap<ComponentId, Arc<SlotCell>>>,
    sink: Option<Arc<dyn StateSink>>,
    faults: Option<Arc<FaultTracker>>,
    metrics: Option<PersistenceMetrics>,
}

impl ValueStore {
    /// Store without a durable mirror.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn StateSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    pub fn with_fault_tracker(mut self, faults: Arc<FaultTracker>) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn cell(&self, id: ComponentId) -> Arc<SlotCell> {
        if let Some(cell) = self.slots.read().get(&id) {
            return Arc::clone(cell);
        }
        Arc::clone(self.slots.write().entry(id).or_default())
    }

    /// Replace the state of `id`. The in-memory value is always updated; an
    /// error only means the durable mirror is behind.
    pub fn set(&self, id: ComponentId, state: ComponentState) -> Result<(), PersistenceDegraded> {
        let cell = self.cell(id);
        let revision = {
            let mut value = cell.value.write();
            let mut revision = cell.revision.lock();
            *revision += 1;
            *value = Some(state.clone());
            *revision
        };
        debug!(component = %id, kind = %state.kind(), power = state.power(), "state updated");

        let Some(sink) = &self.sink else {
            return Ok(());
        };
        let label = id.to_string();
        match cell.gate.commit(revision, || sink.persist(id, &state)) {
            Ok(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_state_written(&label);
                }
                if let Some(faults) = &self.faults {
                    faults.record_success(&DegradedTarget::Component(id));
                }
                Ok(())
            }
            Err(err) => {
                let fault = PersistenceDegraded::component(id, err);
                warn!(component = %id, error = %fault.source, "state mirror write failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_state_failed(&label);
                }
                if let Some(faults) = &self.faults {
                    faults.record_failure(&fault);
                }
                Err(fault)
            }
        }
    }

    /// Latest state of `id`, `None` if it was never written.
    pub fn get(&self, id: ComponentId) -> Option<ComponentState> {
        let cell = self.slots.read().get(&id).cloned()?;
        let value = cell.value.read().clone();
        value
    }

    /// Handle bound to one component.
    pub fn slot(self: &Arc<Self>, id: ComponentId) -> ValueSlot {
        ValueSlot {
            id,
            store: Arc::clone(self),
        }
    }

    /// Ids that hold a value, sorted.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        let cells: Vec<(ComponentId, Arc<SlotCell>)> = self
            .slots
            .read()
            .iter()
            .map(|(id, cell)| (*id, Arc::clone(cell)))
            .collect();
        let mut ids: Vec<ComponentId> = cells
            .into_iter()
            .filter(|(_, cell)| cell.value.read().is_some())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Reload every state from the sink. Components already written in this
    /// process keep their newer value. Returns the number restored.
    pub fn restore(&self) -> vmeter_persistence::Result<usize> {
        let Some(sink) = &self.sink else {
            return Ok(0);
        };
        let mut restored = 0usize;
        for (id, state) in sink.load_all()? {
            let cell = self.cell(id);
            let mut value = cell.value.write();
            if value.is_none() {
                *value = Some(state);
                restored += 1;
            }
        }
        debug!(restored, "component states restored");
        Ok(restored)
    }
}

/// Write/read handle for one component.
#[derive(Debug, Clone)]
pub struct ValueSlot {
    id: ComponentId,
    store: Arc<ValueStore>,
}

impl ValueSlot {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn set(&self, state: impl Into<ComponentState>) -> Result<(), PersistenceDegraded> {
        self.store.set(self.id, state.into())
    }

    pub fn get(&self) -> Option<ComponentState> {
        self.store.get(self.id)
    }
}
