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
use std::thread;

use chrono::{TimeZone, Utc};
use prometheus::Registry;
use vmeter_persistence::{
    CounterKey, CounterLedger, FileLedger, LedgerEntry, MemoryLedger, PersistenceMetrics,
};
use tempfile::tempdir;

#[test]
fn file_ledger_reset_persists_zeroed_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("counters.json");
    let key = CounterKey::new("fems-2", "speicher").unwrap();
    let before = LedgerEntry::new(Utc.timestamp_opt(1_000, 0).unwrap(), 900.0, 450.0);
    let reset_at = Utc.timestamp_opt(2_000, 0).unwrap();

    let ledger = FileLedger::open(&path).unwrap();
    ledger.save(&key, &before).unwrap();
    assert_eq!(ledger.reset(&key, reset_at).unwrap(), Some(before));
    drop(ledger);

    let reopened = FileLedger::open(&path).unwrap();
    assert_eq!(
        reopened.load(&key).unwrap(),
        Some(LedgerEntry::zeroed(reset_at))
    );
}

#[test]
fn concurrent_writers_to_distinct_keys_do_not_clobber_each_other() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("counters.json");
    let ledger = Arc::new(FileLedger::open(&path).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|device| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let key = CounterKey::new(format!("device-{device}"), "bezug").unwrap();
                for step in 0..10 {
                    let entry = LedgerEntry::new(
                        Utc.timestamp_opt(step, 0).unwrap(),
                        step as f64 * 10.0,
                        0.0,
                    );
                    ledger.save(&key, &entry).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    drop(ledger);

    let reopened = FileLedger::open(&path).unwrap();
    let entries = reopened.entries().unwrap();
    assert_eq!(entries.len(), 8);
    for (_, entry) in entries {
        assert_eq!(entry.imported_wh, 90.0);
        assert_eq!(entry.last_timestamp, Utc.timestamp_opt(9, 0).unwrap());
    }
}

#[test]
fn readers_never_observe_torn_entries() {
    let ledger = Arc::new(MemoryLedger::new());
    let key = CounterKey::new("batterx-1", "bezug").unwrap();
    ledger
        .save(&key, &LedgerEntry::new(Utc.timestamp_opt(0, 0).unwrap(), 0.0, 0.0))
        .unwrap();

    let writer = {
        let ledger = Arc::clone(&ledger);
        let key = key.clone();
        thread::spawn(move || {
            for step in 1..2_000i64 {
                // totals always equal the timestamp in seconds
                let entry = LedgerEntry::new(
                    Utc.timestamp_opt(step, 0).unwrap(),
                    step as f64,
                    step as f64,
                );
                ledger.save(&key, &entry).unwrap();
            }
        })
    };

    for _ in 0..2_000 {
        let entry = ledger.load(&key).unwrap().unwrap();
        let secs = entry.last_timestamp.timestamp() as f64;
        assert_eq!(entry.imported_wh, secs);
        assert_eq!(entry.exported_wh, secs);
    }
    writer.join().unwrap();
}

#[test]
fn persistence_metrics_capture_activity() {
    let registry = Arc::new(Registry::new());
    let metrics = PersistenceMetrics::new(registry.clone()).unwrap();

    metrics.record_ledger_saved("batterx-1/bezug");
    metrics.record_ledger_saved("batterx-1/bezug");
    metrics.record_ledger_failed("batterx-1/bezug");
    metrics.record_state_written("7");

    let families = registry.gather();
    assert_eq!(metric_total(&families, "vmeter_ledger_saves_total"), 2.0);
    assert_eq!(metric_total(&families, "vmeter_ledger_save_failures_total"), 1.0);
    assert_eq!(metric_total(&families, "vmeter_state_writes_total"), 1.0);
}

fn metric_total(families: &[prometheus::proto::MetricFamily], name: &str) -> f64 {
    families
        .iter()
        .find(|family| family.get_name() == name)
        .and_then(|family| family.get_metric().first())
        .map(|metric| metric.get_counter().get_value())
        .unwrap_or_default()
}
