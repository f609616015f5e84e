//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Start-up wiring of integrator, ledger and value store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::Registry;
use tracing::info;
use vmeter_common::{AppConfig, Clock, LedgerBackend};
use vmeter_persistence::{AuditLog, CounterKey, CounterLedger, FileLedger, MemoryLedger, PersistenceMetrics};

use crate::admin::LedgerAdmin;
use crate::fault::{FaultReporter, FaultTracker};
use crate::integrator::{EnergyIntegrator, SimCounter};
use crate::metrics::CounterMetrics;
use crate::state::ComponentId;
use crate::store::{JsonStateSink, ValueSlot, ValueStore};

/// Everything a device adapter needs, constructed once at start-up.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub integrator: Arc<EnergyIntegrator>,
    pub store: Arc<ValueStore>,
    pub faults: Arc<FaultTracker>,
    pub clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Open the configured ledger and state mirror and register metrics with
    /// `registry`.
    pub fn from_config(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn FaultReporter>,
        registry: Arc<Registry>,
    ) -> Result<Self> {
        let counter_metrics =
            CounterMetrics::new(registry.clone()).context("registering counter metrics")?;
        let persistence_metrics =
            PersistenceMetrics::new(registry).context("registering persistence metrics")?;

        let ledger = open_ledger(config)?;
        let faults = Arc::new(
            FaultTracker::new(config.integrator.escalate_after, reporter)
                .with_metrics(counter_metrics.clone()),
        );

        let integrator = EnergyIntegrator::new(ledger, config.integrator.clone())
            .with_seeds(config.seeds.iter())
            .context("building seeded counter keys")?
            .with_fault_tracker(faults.clone())
            .with_metrics(counter_metrics)
            .with_persistence_metrics(persistence_metrics.clone());

        let store = if config.store.durable {
            let store = ValueStore::with_sink(Arc::new(JsonStateSink::new(&config.store.directory)))
                .with_fault_tracker(faults.clone())
                .with_metrics(persistence_metrics);
            let restored = store.restore().with_context(|| {
                format!("restoring component states from {}", config.store.directory.display())
            })?;
            info!(restored, directory = %config.store.directory.display(), "value store restored");
            store
        } else {
            ValueStore::in_memory()
        };

        Ok(Self {
            integrator: Arc::new(integrator),
            store: Arc::new(store),
            faults,
            clock,
        })
    }

    pub fn sim_counter(&self, key: CounterKey) -> SimCounter {
        SimCounter::new(self.integrator.clone(), key, self.clock.clone())
    }

    pub fn value_slot(&self, id: ComponentId) -> ValueSlot {
        self.store.slot(id)
    }

    pub fn admin(&self) -> LedgerAdmin {
        LedgerAdmin::new(self.integrator.clone(), self.clock.clone())
    }

    /// Admin handle that appends to the configured audit log.
    pub fn audited_admin(&self, config: &AppConfig) -> Result<LedgerAdmin> {
        let audit = AuditLog::open(&config.audit.path)
            .with_context(|| format!("opening audit log {}", config.audit.path.display()))?;
        Ok(self.admin().with_audit(Arc::new(audit)))
    }
}

/// Open the ledger backend named in `config`.
pub fn open_ledger(config: &AppConfig) -> Result<Arc<dyn CounterLedger>> {
    let ledger: Arc<dyn CounterLedger> = match config.ledger.backend {
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::File => Arc::new(
            FileLedger::open(&config.ledger.path).with_context(|| {
                format!("opening counter ledger {}", config.ledger.path.display())
            })?,
        ),
    };
    info!(backend = ?config.ledger.backend, "counter ledger ready");
    Ok(ledger)
}
