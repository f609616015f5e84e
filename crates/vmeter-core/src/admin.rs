//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Audited administrative ledger operations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::info;
use vmeter_common::Clock;
use vmeter_persistence::{AuditAction, AuditLog, CounterKey, LedgerEntry};

use crate::error::AdminError;
use crate::integrator::EnergyIntegrator;

/// Resets and seeds counters through the integrator so cached totals are
/// replaced too, and records every change in the audit log.
#[derive(Debug, Clone)]
pub struct LedgerAdmin {
    integrator: Arc<EnergyIntegrator>,
    audit: Option<Arc<AuditLog>>,
    clock: Arc<dyn Clock>,
}

impl LedgerAdmin {
    pub fn new(integrator: Arc<EnergyIntegrator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            integrator,
            audit: None,
            clock,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn list(&self) -> Result<Vec<(CounterKey, LedgerEntry)>, AdminError> {
        Ok(self.integrator.entries()?)
    }

    /// Zero the totals of `key`, e.g. after a meter swap.
    pub fn reset(&self, key: &CounterKey, operator: &str) -> Result<Option<LedgerEntry>, AdminError> {
        let previous = self.integrator.reset(key, self.clock.now())?;
        self.record(
            operator,
            AuditAction::Reset {
                key: key.clone(),
                previous,
            },
        )?;
        Ok(previous)
    }

    /// Set explicit totals for `key`. An existing entry is only replaced with
    /// `force`.
    pub fn seed(
        &self,
        key: &CounterKey,
        imported_wh: f64,
        exported_wh: f64,
        force: bool,
        operator: &str,
    ) -> Result<LedgerEntry, AdminError> {
        let valid = |value: f64| value.is_finite() && value >= 0.0;
        if !valid(imported_wh) || !valid(exported_wh) {
            return Err(AdminError::InvalidTotals {
                key: key.clone(),
                imported_wh,
                exported_wh,
            });
        }
        if !force && self.integrator.current(key)?.is_some() {
            return Err(AdminError::AlreadyPresent(key.clone()));
        }

        let now = self.clock.now();
        let previous = self.integrator.seed(key, imported_wh, exported_wh, now)?;
        self.record(
            operator,
            AuditAction::Seed {
                key: key.clone(),
                imported_wh,
                exported_wh,
                previous,
            },
        )?;
        Ok(LedgerEntry::new(now, imported_wh, exported_wh))
    }

    fn record(&self, operator: &str, action: AuditAction) -> Result<(), AdminError> {
        if let Some(audit) = &self.audit {
            let sequence = audit.append(operator, action)?;
            info!(operator, sequence, "ledger change audited");
        }
        Ok(())
    }
}
