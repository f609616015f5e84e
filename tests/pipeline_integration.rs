//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Integration and validation tests for the vmeter stack."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use prometheus::Registry;
use tempfile::TempDir;
use vmeter_common::{AppConfig, ManualClock};
use vmeter_core::{
    BatState, ComponentId, CounterState, DegradedTarget, FaultReporter, FaultStatus, LogFaultReporter,
    PersistenceDegraded, Pipeline,
};
use vmeter_persistence::CounterKey;

#[derive(Debug, Default)]
struct CollectingReporter {
    escalated: Mutex<Vec<String>>,
    recovered: Mutex<Vec<String>>,
}

impl FaultReporter for CollectingReporter {
    fn escalate(&self, fault: &PersistenceDegraded, _consecutive: u32) {
        self.escalated.lock().push(fault.target.to_string());
    }

    fn recovered(&self, target: &DegradedTarget, _failures: u32) {
        self.recovered.lock().push(target.to_string());
    }
}

fn config_in(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.path = root.join("ledger").join("counters.json");
    config.store.durable = true;
    config.store.directory = root.join("state");
    config.audit.path = root.join("audit.log");
    config
}

fn counter_total(registry: &Registry, name: &str) -> f64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| metric.get_counter().get_value())
        .sum()
}

#[test]
fn battery_polling_cycle_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let clock = Arc::new(ManualClock::at_unix_seconds(1_700_000_000));
    let key = CounterKey::new("bat-1", "speicher").unwrap();
    let id = ComponentId(3);

    {
        let pipeline = Pipeline::from_config(
            &config,
            clock.clone(),
            Arc::new(LogFaultReporter),
            Arc::new(Registry::new()),
        )
        .unwrap();
        let counter = pipeline.sim_counter(key.clone());
        let slot = pipeline.value_slot(id);

        for (power, soc) in [(1000.0, 50.0), (1000.0, 60.0), (-500.0, 55.0)] {
            let totals = counter.sim_count(power);
            assert!(!totals.is_degraded());
            slot.set(BatState::new(power, soc, totals.imported_wh, totals.exported_wh))
                .unwrap();
            clock.advance(Duration::hours(1));
        }

        let state = pipeline.store.get(id).unwrap();
        assert_eq!((state.imported(), state.exported()), (1000.0, 500.0));
    }

    let pipeline = Pipeline::from_config(
        &config,
        clock.clone(),
        Arc::new(LogFaultReporter),
        Arc::new(Registry::new()),
    )
    .unwrap();
    let restored = pipeline.store.get(id).unwrap();
    assert_eq!(restored, BatState::new(-500.0, 55.0, 1000.0, 500.0).into());

    let counter = pipeline.sim_counter(key);
    assert_eq!(counter.sim_count(-500.0).totals(), (1000.0, 500.0));
    clock.advance(Duration::minutes(30));
    assert_eq!(counter.sim_count(-500.0).totals(), (1000.0, 750.0));
}

#[test]
fn irregular_polling_totals_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let clock = Arc::new(ManualClock::at_unix_seconds(1_700_000_000));
    let key = CounterKey::new("fems-2", "bezug").unwrap();
    let id = ComponentId(8);
    let start = || {
        Pipeline::from_config(
            &config,
            clock.clone(),
            Arc::new(LogFaultReporter),
            Arc::new(Registry::new()),
        )
        .unwrap()
    };

    let before = {
        let pipeline = start();
        let counter = pipeline.sim_counter(key.clone());
        let slot = pipeline.value_slot(id);
        let mut totals = (0.0, 0.0);
        for step in 0..90_i64 {
            let power = 987.654 * ((step % 9) as f64 - 4.0) + 0.321;
            let result = counter.sim_count(power);
            assert!(!result.is_degraded(), "step {step}");
            totals = result.totals();
            slot.set(CounterState::new(power, totals.0, totals.1)).unwrap();
            clock.advance(Duration::milliseconds(7_000 + 1_337 * (step % 13)));
        }
        totals
    };
    assert!(before.0 > 0.0 && before.1 > 0.0);

    let pipeline = start();
    let restored = pipeline.store.get(id).unwrap();
    assert_eq!((restored.imported(), restored.exported()), before);
    let counter = pipeline.sim_counter(key);
    assert_eq!(counter.sim_count(0.0).totals(), before);
}

#[test]
fn unwritable_ledger_degrades_then_escalates_and_recovers() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let clock = Arc::new(ManualClock::at_unix_seconds(0));
    let reporter = Arc::new(CollectingReporter::default());
    let registry = Arc::new(Registry::new());
    let pipeline =
        Pipeline::from_config(&config, clock.clone(), reporter.clone(), registry.clone()).unwrap();
    let key = CounterKey::new("batterx-1", "bezug").unwrap();
    let counter = pipeline.sim_counter(key.clone());

    // a plain file where the ledger directory should be
    let ledger_dir = dir.path().join("ledger");
    fs::remove_dir_all(&ledger_dir).unwrap();
    fs::write(&ledger_dir, b"blocked").unwrap();

    let mut last = (0.0, 0.0);
    for step in 0..4 {
        let result = counter.sim_count(3600.0);
        assert!(result.is_degraded(), "step {step} should be degraded");
        assert!(result.imported_wh >= last.0);
        last = result.totals();
        clock.advance(Duration::seconds(60));
    }
    assert_eq!(last, (180.0, 0.0));
    assert_eq!(reporter.escalated.lock().as_slice(), ["counter batterx-1/bezug"]);
    assert_eq!(
        pipeline.faults.status(&DegradedTarget::Counter(key.clone())),
        FaultStatus::Escalated { consecutive: 4 }
    );
    assert_eq!(counter_total(&registry, "vmeter_ledger_save_failures_total"), 4.0);
    assert_eq!(counter_total(&registry, "vmeter_persistence_escalations_total"), 1.0);

    fs::remove_file(&ledger_dir).unwrap();
    let healed = counter.sim_count(3600.0);
    assert!(!healed.is_degraded());
    assert_eq!(healed.totals(), (240.0, 0.0));
    assert_eq!(reporter.recovered.lock().len(), 1);
    assert_eq!(counter_total(&registry, "vmeter_ledger_saves_total"), 1.0);
}

#[test]
fn integration_metrics_follow_polling() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let clock = Arc::new(ManualClock::at_unix_seconds(0));
    let registry = Arc::new(Registry::new());
    let pipeline = Pipeline::from_config(
        &config,
        clock.clone(),
        Arc::new(LogFaultReporter),
        registry.clone(),
    )
    .unwrap();
    let counter = pipeline.sim_counter(CounterKey::new("inverter-1", "pv").unwrap());

    counter.sim_count(-2000.0).totals();
    clock.advance(Duration::hours(-1));
    let regressed = counter.sim_count(-2000.0);
    assert!(regressed.anomaly.is_some());

    assert_eq!(counter_total(&registry, "vmeter_integrations_total"), 2.0);
    assert_eq!(counter_total(&registry, "vmeter_elapsed_anomalies_total"), 1.0);
    assert_eq!(counter_total(&registry, "vmeter_ledger_saves_total"), 2.0);
}
