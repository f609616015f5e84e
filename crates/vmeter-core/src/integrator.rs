//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power-to-energy integration for devices without energy registers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Many devices report instantaneous power but no cumulative energy. The
//! [`EnergyIntegrator`] turns successive power samples into monotonically
//! increasing import/export totals and keeps them in a [`CounterLedger`] so
//! they survive restarts.
//!
//! Each key has its own slot guarded by a short lock. The new entry is
//! computed under that lock and stamped with a revision; the ledger write
//! happens afterwards through a per-key [`WriteGate`] so concurrent keys never
//! wait on each other's I/O and an older entry can never overwrite a newer one.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vmeter_common::{elapsed_hours, Clock, IntegratorConfig, SeedConfig};
use vmeter_persistence::{CounterKey, CounterLedger, LedgerEntry, PersistenceMetrics};

use crate::error::{DegradedTarget, ElapsedAnomaly, PersistenceDegraded};
use crate::fault::{FaultTracker, LogFaultReporter};
use crate::locks::{KeyedLocks, WriteGate};
use crate::metrics::CounterMetrics;

/// Totals after one integration step.
#[derive(Debug)]
#[must_use]
pub struct Integration {
    pub imported_wh: f64,
    pub exported_wh: f64,
    /// Set when the step's elapsed time was rejected.
    pub anomaly: Option<ElapsedAnomaly>,
    /// Set when the ledger write failed; the totals are still valid in memory.
    pub degraded: Option<PersistenceDegraded>,
}

impl Integration {
    fn clean(entry: &LedgerEntry) -> Self {
        Self {
            imported_wh: entry.imported_wh,
            exported_wh: entry.exported_wh,
            anomaly: None,
            degraded: None,
        }
    }

    pub fn totals(&self) -> (f64, f64) {
        (self.imported_wh, self.exported_wh)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    entry: Option<LedgerEntry>,
    revision: u64,
}

#[derive(Debug, Default)]
struct CounterSlot {
    state: Mutex<SlotState>,
    gate: WriteGate,
}

/// Shared integrator for all simulated counters.
pub struct EnergyIntegrator {
    ledger: Arc<dyn CounterLedger>,
    config: IntegratorConfig,
    seeds: HashMap<CounterKey, (f64, f64)>,
    slots: KeyedLocks<CounterKey, CounterSlot>,
    faults: Arc<FaultTracker>,
    metrics: Option<CounterMetrics>,
    persistence_metrics: Option<PersistenceMetrics>,
}

impl fmt::Debug for EnergyIntegrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyIntegrator")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .field("counters", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl EnergyIntegrator {
    pub fn new(ledger: Arc<dyn CounterLedger>, config: IntegratorConfig) -> Self {
        let faults = Arc::new(FaultTracker::new(
            config.escalate_after,
            Arc::new(LogFaultReporter),
        ));
        Self {
            ledger,
            config,
            seeds: HashMap::new(),
            slots: KeyedLocks::new(),
            faults,
            metrics: None,
            persistence_metrics: None,
        }
    }

    /// Starting totals for counters that have no ledger entry yet.
    pub fn with_seeds<'a>(
        mut self,
        seeds: impl IntoIterator<Item = &'a SeedConfig>,
    ) -> vmeter_persistence::Result<Self> {
        for seed in seeds {
            self.seeds.insert(
                CounterKey::new(seed.device.as_str(), seed.counter.as_str())?,
                (seed.imported_wh, seed.exported_wh),
            );
        }
        Ok(self)
    }

    pub fn with_fault_tracker(mut self, faults: Arc<FaultTracker>) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_metrics(mut self, metrics: CounterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_persistence_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.persistence_metrics = Some(metrics);
        self
    }

    pub fn faults(&self) -> &Arc<FaultTracker> {
        &self.faults
    }

    pub fn ledger(&self) -> &Arc<dyn CounterLedger> {
        &self.ledger
    }

    /// Fold one power sample taken at `now` into the totals for `key`.
    ///
    /// Positive power advances the imported total, negative power the
    /// exported total. Never fails: persistence problems are reported through
    /// [`Integration::degraded`].
    pub fn integrate(&self, key: &CounterKey, power_watts: f64, now: DateTime<Utc>) -> Integration {
        let slot = self.slots.slot(key);

        let loaded = if slot.state.lock().entry.is_none() {
            match self.ledger.load(key) {
                Ok(loaded) => Some(loaded),
                Err(err) => {
                    // stay uninitialised so the next sample retries the load
                    let fault = PersistenceDegraded::counter(key, err);
                    warn!(counter = %key, error = %fault.source, "counter ledger unreadable");
                    self.faults.record_failure(&fault);
                    let (imported_wh, exported_wh) = self.seed_totals(key);
                    return Integration {
                        imported_wh,
                        exported_wh,
                        anomaly: None,
                        degraded: Some(fault),
                    };
                }
            }
        } else {
            None
        };

        let power = sanitize_power(key, power_watts);
        let (entry, anomaly, revision) = {
            let mut state = slot.state.lock();
            let (entry, anomaly) = match state.entry {
                Some(previous) => self.advance(key, previous, power, now),
                // another sample may have initialised the slot meanwhile
                None => (self.initial_entry(key, loaded.flatten(), now), None),
            };
            state.entry = Some(entry);
            state.revision += 1;
            (entry, anomaly, state.revision)
        };

        if let Some(metrics) = &self.metrics {
            let label = key.to_string();
            metrics.record_integration(&label, entry.imported_wh, entry.exported_wh);
            if let Some(anomaly) = &anomaly {
                metrics.record_anomaly(&label, anomaly.kind());
            }
        }

        let degraded = self.persist(key, &slot, revision, &entry);
        Integration {
            imported_wh: entry.imported_wh,
            exported_wh: entry.exported_wh,
            anomaly,
            degraded,
        }
    }

    /// Convenience wrapper reading `now` from `clock`.
    pub fn integrate_now(&self, key: &CounterKey, power_watts: f64, clock: &dyn Clock) -> Integration {
        self.integrate(key, power_watts, clock.now())
    }

    /// Latest known entry for `key`, from memory or the ledger.
    pub fn current(&self, key: &CounterKey) -> vmeter_persistence::Result<Option<LedgerEntry>> {
        if let Some(slot) = self.slots.get(key) {
            if let Some(entry) = slot.state.lock().entry {
                return Ok(Some(entry));
            }
        }
        self.ledger.load(key)
    }

    pub fn entries(&self) -> vmeter_persistence::Result<Vec<(CounterKey, LedgerEntry)>> {
        self.ledger.entries()
    }

    /// Zero the totals of `key` and return the entry that was replaced.
    pub fn reset(
        &self,
        key: &CounterKey,
        at: DateTime<Utc>,
    ) -> vmeter_persistence::Result<Option<LedgerEntry>> {
        let previous = self.overwrite(key, LedgerEntry::zeroed(at))?;
        info!(counter = %key, "counter reset");
        Ok(previous)
    }

    /// Replace the totals of `key` and return the entry that was replaced.
    pub fn seed(
        &self,
        key: &CounterKey,
        imported_wh: f64,
        exported_wh: f64,
        at: DateTime<Utc>,
    ) -> vmeter_persistence::Result<Option<LedgerEntry>> {
        let previous = self.overwrite(key, LedgerEntry::new(at, imported_wh, exported_wh))?;
        info!(counter = %key, imported_wh, exported_wh, "counter seeded");
        Ok(previous)
    }

    fn overwrite(
        &self,
        key: &CounterKey,
        entry: LedgerEntry,
    ) -> vmeter_persistence::Result<Option<LedgerEntry>> {
        let slot = self.slots.slot(key);
        let loaded = if slot.state.lock().entry.is_none() {
            self.ledger.load(key)?
        } else {
            None
        };

        // bump first so any in-flight write of an older step is skipped
        let (cached, revision) = {
            let mut state = slot.state.lock();
            let cached = state.entry.replace(entry);
            state.revision += 1;
            (cached, state.revision)
        };
        let previous = cached.or(loaded);

        if let Err(err) = slot.gate.commit(revision, || self.ledger.save(key, &entry)) {
            let mut state = slot.state.lock();
            // roll back unless a later sample already built on the new entry
            if state.revision == revision {
                state.entry = cached;
            }
            return Err(err);
        }
        self.faults.record_success(&DegradedTarget::Counter(key.clone()));
        Ok(previous)
    }

    fn initial_entry(
        &self,
        key: &CounterKey,
        loaded: Option<LedgerEntry>,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        match loaded {
            Some(stored) => {
                debug!(
                    counter = %key,
                    imported_wh = stored.imported_wh,
                    exported_wh = stored.exported_wh,
                    "counter restored from ledger"
                );
                LedgerEntry {
                    last_timestamp: now,
                    ..stored
                }
            }
            None => {
                let (imported_wh, exported_wh) = self.seed_totals(key);
                debug!(counter = %key, imported_wh, exported_wh, "counter started");
                LedgerEntry::new(now, imported_wh, exported_wh)
            }
        }
    }

    fn seed_totals(&self, key: &CounterKey) -> (f64, f64) {
        self.seeds.get(key).copied().unwrap_or((0.0, 0.0))
    }

    fn advance(
        &self,
        key: &CounterKey,
        previous: LedgerEntry,
        power: f64,
        now: DateTime<Utc>,
    ) -> (LedgerEntry, Option<ElapsedAnomaly>) {
        let mut next = LedgerEntry {
            last_timestamp: now,
            ..previous
        };
        let hours = elapsed_hours(previous.last_timestamp, now);
        let ceiling_hours = self.config.max_elapsed.as_secs_f64() / 3600.0;

        if hours < 0.0 {
            // rebase on the stepped-back clock so the following samples count
            let anomaly = ElapsedAnomaly::ClockRegression {
                behind_secs: -hours * 3600.0,
            };
            warn!(counter = %key, %anomaly, "sample discarded");
            return (next, Some(anomaly));
        }
        if hours > ceiling_hours {
            let anomaly = ElapsedAnomaly::ImplausibleElapsedTime {
                elapsed_secs: hours * 3600.0,
                ceiling_secs: ceiling_hours * 3600.0,
            };
            warn!(counter = %key, %anomaly, "sample discarded");
            return (next, Some(anomaly));
        }

        let delta_wh = power.abs() * hours;
        if power >= 0.0 {
            next.imported_wh += delta_wh;
        } else {
            next.exported_wh += delta_wh;
        }
        debug!(
            counter = %key,
            power,
            hours,
            delta_wh,
            imported_wh = next.imported_wh,
            exported_wh = next.exported_wh,
            "integrated"
        );
        (next, None)
    }

    fn persist(
        &self,
        key: &CounterKey,
        slot: &CounterSlot,
        revision: u64,
        entry: &LedgerEntry,
    ) -> Option<PersistenceDegraded> {
        let label = key.to_string();
        match slot.gate.commit(revision, || self.ledger.save(key, entry)) {
            Ok(written) => {
                if written {
                    if let Some(metrics) = &self.persistence_metrics {
                        metrics.record_ledger_saved(&label);
                    }
                }
                self.faults.record_success(&DegradedTarget::Counter(key.clone()));
                None
            }
            Err(err) => {
                let fault = PersistenceDegraded::counter(key, err);
                warn!(counter = %key, error = %fault.source, "ledger save failed; totals kept in memory");
                if let Some(metrics) = &self.persistence_metrics {
                    metrics.record_ledger_failed(&label);
                }
                self.faults.record_failure(&fault);
                Some(fault)
            }
        }
    }
}

fn sanitize_power(key: &CounterKey, power_watts: f64) -> f64 {
    if power_watts.is_finite() {
        power_watts
    } else {
        warn!(counter = %key, power = %power_watts, "non-finite power sample treated as 0 W");
        0.0
    }
}

/// Where a component's energy totals come from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergySource {
    /// The device reports cumulative registers.
    Reported { imported_wh: f64, exported_wh: f64 },
    /// The device reports power only; totals are integrated.
    Simulated,
}

impl EnergySource {
    /// Reported only when both registers are available.
    pub fn from_registers(imported_wh: Option<f64>, exported_wh: Option<f64>) -> Self {
        match (imported_wh, exported_wh) {
            (Some(imported_wh), Some(exported_wh)) => EnergySource::Reported {
                imported_wh,
                exported_wh,
            },
            _ => EnergySource::Simulated,
        }
    }
}

/// Handle bound to one counter, handed to a device adapter at start-up.
#[derive(Clone)]
pub struct SimCounter {
    key: CounterKey,
    integrator: Arc<EnergyIntegrator>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SimCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimCounter")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SimCounter {
    pub fn new(integrator: Arc<EnergyIntegrator>, key: CounterKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            integrator,
            clock,
        }
    }

    pub fn key(&self) -> &CounterKey {
        &self.key
    }

    /// Integrate `power_watts` at the current clock time.
    pub fn sim_count(&self, power_watts: f64) -> Integration {
        self.integrator
            .integrate(&self.key, power_watts, self.clock.now())
    }

    /// Use reported registers when present, otherwise integrate.
    pub fn resolve(&self, power_watts: f64, source: EnergySource) -> Integration {
        match source {
            EnergySource::Reported {
                imported_wh,
                exported_wh,
            } => Integration::clean(&LedgerEntry::new(self.clock.now(), imported_wh, exported_wh)),
            EnergySource::Simulated => self.sim_count(power_watts),
        }
    }
}
