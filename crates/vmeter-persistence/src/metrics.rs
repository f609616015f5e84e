//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published for ledger and value-store writes.
#[derive(Clone)]
pub struct PersistenceMetrics {
    ledger_saves: IntCounterVec,
    ledger_failures: IntCounterVec,
    state_writes: IntCounterVec,
    state_failures: IntCounterVec,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let ledger_saves = IntCounterVec::new(
            Opts::new(
                "vmeter_ledger_saves_total",
                "Counter ledger entries durably written",
            ),
            &["counter"],
        )?;
        registry.register(Box::new(ledger_saves.clone()))?;

        let ledger_failures = IntCounterVec::new(
            Opts::new(
                "vmeter_ledger_save_failures_total",
                "Counter ledger writes that failed and left the entry in memory only",
            ),
            &["counter"],
        )?;
        registry.register(Box::new(ledger_failures.clone()))?;

        let state_writes = IntCounterVec::new(
            Opts::new(
                "vmeter_state_writes_total",
                "Component states mirrored to durable storage",
            ),
            &["component"],
        )?;
        registry.register(Box::new(state_writes.clone()))?;

        let state_failures = IntCounterVec::new(
            Opts::new(
                "vmeter_state_write_failures_total",
                "Component state mirror writes that failed",
            ),
            &["component"],
        )?;
        registry.register(Box::new(state_failures.clone()))?;

        Ok(Self {
            ledger_saves,
            ledger_failures,
            state_writes,
            state_failures,
            registry,
        })
    }

    /// Record a successful ledger save.
    pub fn record_ledger_saved(&self, counter: &str) {
        self.ledger_saves.with_label_values(&[counter]).inc();
    }

    /// Record a failed ledger save.
    pub fn record_ledger_failed(&self, counter: &str) {
        self.ledger_failures.with_label_values(&[counter]).inc();
    }

    /// Record a successful component state write.
    pub fn record_state_written(&self, component: &str) {
        self.state_writes.with_label_values(&[component]).inc();
    }

    /// Record a failed component state write.
    pub fn record_state_failed(&self, component: &str) {
        self.state_failures.with_label_values(&[component]).inc();
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
