//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "End-to-end tests for the control CLI."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use vmeter_persistence::{CounterKey, CounterLedger, FileLedger, LedgerEntry};

fn write_config(dir: &Path) -> PathBuf {
    let config = format!(
        r#"
[ledger]
backend = "file"
path = "{ledger}"

[store]
durable = true
directory = "{state}"

[audit]
path = "{audit}"
"#,
        ledger = dir.join("counters.json").display(),
        state = dir.join("state").display(),
        audit = dir.join("audit.log").display(),
    );
    let path = dir.join("vmeter.toml");
    fs::write(&path, config).unwrap();
    path
}

fn vmeterctl(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("vmeterctl").unwrap();
    cmd.env_remove("VMETER_CONFIG")
        .env_remove("VMETER_OPERATOR")
        .env("VMETER_LOG", "warn")
        .arg("--config")
        .arg(config);
    cmd
}

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn seed_then_list_as_json() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let seeded = stdout(vmeterctl(&config).args([
        "ledger",
        "seed",
        "batterx-1/bezug",
        "--imported",
        "1.5",
        "--unit",
        "kWh",
    ]));
    assert!(seeded.contains("imported 1500.000 Wh"));

    let listed = stdout(vmeterctl(&config).args(["ledger", "list", "--json"]));
    let value: serde_json::Value = serde_json::from_str(&listed).unwrap();
    assert_eq!(value["batterx-1/bezug"]["imported_wh"], 1500.0);
    assert_eq!(value["batterx-1/bezug"]["exported_wh"], 0.0);
}

#[test]
fn second_seed_requires_force() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let seed = |extra: &[&str]| {
        let mut cmd = vmeterctl(&config);
        cmd.args(["ledger", "seed", "fems-1/speicher", "--exported", "20"])
            .args(extra);
        cmd.output().unwrap()
    };

    assert!(seed(&[]).status.success());
    let refused = seed(&[]);
    assert!(!refused.status.success());
    assert!(String::from_utf8_lossy(&refused.stderr).contains("already has a ledger entry"));
    assert!(seed(&["--force"]).status.success());
}

#[test]
fn reset_is_recorded_in_audit_trail() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    stdout(vmeterctl(&config).args(["ledger", "seed", "bat-1/speicher", "--imported", "700"]));
    let reset = stdout(
        vmeterctl(&config)
            .args(["ledger", "reset", "bat-1/speicher", "--operator", "alice"]),
    );
    assert!(reset.contains("was imported 700.000 Wh"));

    let trail = stdout(vmeterctl(&config).args(["ledger", "audit"]));
    assert!(trail.contains("seed bat-1/speicher imported=700"));
    assert!(trail.contains("alice"));
    assert!(trail.contains("2 audit entries"));
}

#[test]
fn malformed_key_is_rejected_by_the_parser() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let output = vmeterctl(&config)
        .args(["ledger", "reset", "no-delimiter"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(!dir.path().join("counters.json").exists());
}

#[test]
fn store_show_reports_empty_directory() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let shown = stdout(vmeterctl(&config).args(["store", "show"]));
    assert!(shown.contains("No component states"));

    let missing = vmeterctl(&config)
        .args(["store", "show", "7"])
        .output()
        .unwrap();
    assert!(!missing.status.success());
}

#[test]
fn verify_detects_tampering() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    stdout(vmeterctl(&config).args(["ledger", "seed", "bat-1/speicher", "--imported", "10"]));
    assert!(stdout(vmeterctl(&config).args(["ledger", "verify"])).contains("ok"));

    let ledger = dir.path().join("counters.json");
    let tampered = fs::read_to_string(&ledger).unwrap().replace("10.0", "99.0");
    fs::write(&ledger, tampered).unwrap();
    let output = vmeterctl(&config).args(["ledger", "verify"]).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn admin_commands_refuse_a_ledger_held_by_a_running_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let live = FileLedger::open(dir.path().join("counters.json")).unwrap();
    live.save(
        &CounterKey::new("bat-1", "speicher").unwrap(),
        &LedgerEntry::new(Utc.timestamp_opt(0, 0).unwrap(), 1000.0, 0.0),
    )
    .unwrap();

    let refused = vmeterctl(&config)
        .args(["ledger", "reset", "bat-1/speicher"])
        .output()
        .unwrap();
    assert!(!refused.status.success());
    assert!(String::from_utf8_lossy(&refused.stderr).contains("held open by another process"));
    assert!(!dir.path().join("audit.log").exists());

    // read-only listing still works while the owner is alive
    let listed = stdout(vmeterctl(&config).args(["ledger", "list", "--json"]));
    let value: serde_json::Value = serde_json::from_str(&listed).unwrap();
    assert_eq!(value["bat-1/speicher"]["imported_wh"], 1000.0);

    drop(live);
    let reset = stdout(vmeterctl(&config).args(["ledger", "reset", "bat-1/speicher"]));
    assert!(reset.contains("was imported 1000.000 Wh"));
}
