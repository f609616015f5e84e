//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus metrics for counter simulation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};

/// Metrics published by the energy integrator and fault tracker.
#[derive(Clone)]
pub struct CounterMetrics {
    integrations: IntCounterVec,
    anomalies: IntCounterVec,
    energy: GaugeVec,
    escalations: IntCounterVec,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl CounterMetrics {
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let integrations = IntCounterVec::new(
            Opts::new(
                "vmeter_integrations_total",
                "Power samples folded into simulated counters",
            ),
            &["counter"],
        )?;
        registry.register(Box::new(integrations.clone()))?;

        let anomalies = IntCounterVec::new(
            Opts::new(
                "vmeter_elapsed_anomalies_total",
                "Samples whose elapsed time was rejected",
            ),
            &["counter", "kind"],
        )?;
        registry.register(Box::new(anomalies.clone()))?;

        let energy = GaugeVec::new(
            Opts::new("vmeter_energy_wh", "Current simulated energy totals"),
            &["counter", "direction"],
        )?;
        registry.register(Box::new(energy.clone()))?;

        let escalations = IntCounterVec::new(
            Opts::new(
                "vmeter_persistence_escalations_total",
                "Persistence fault streaks escalated to the fault reporter",
            ),
            &["target"],
        )?;
        registry.register(Box::new(escalations.clone()))?;

        Ok(Self {
            integrations,
            anomalies,
            energy,
            escalations,
            registry,
        })
    }

    pub fn record_integration(&self, counter: &str, imported_wh: f64, exported_wh: f64) {
        self.integrations.with_label_values(&[counter]).inc();
        self.energy
            .with_label_values(&[counter, "imported"])
            .set(imported_wh);
        self.energy
            .with_label_values(&[counter, "exported"])
            .set(exported_wh);
    }

    pub fn record_anomaly(&self, counter: &str, kind: &str) {
        self.anomalies.with_label_values(&[counter, kind]).inc();
    }

    pub fn record_escalation(&self, target: &str) {
        self.escalations.with_label_values(&[target]).inc();
    }
}

impl std::fmt::Debug for CounterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterMetrics").finish_non_exhaustive()
    }
}
