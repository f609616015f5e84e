//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ledger administration subcommands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use indexmap::IndexMap;
use vmeter_common::{AppConfig, LedgerBackend, SystemClock};
use vmeter_core::{open_ledger, scale_metric, BaseUnit, EnergyIntegrator, LedgerAdmin};
use vmeter_persistence::audit::replay;
use vmeter_persistence::{AuditAction, AuditLog, CounterKey, FileLedger, LedgerEntry};

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// List every counter with its totals.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Zero the totals of a counter, e.g. after a meter swap.
    Reset {
        /// Counter key as `<device>/<counter>`.
        key: CounterKey,
        #[command(flatten)]
        operator: OperatorArgs,
    },
    /// Set explicit totals for a counter.
    Seed(SeedArgs),
    /// Print the audit trail of resets and seeds.
    Audit,
    /// Check the ledger document's integrity hash.
    Verify,
}

#[derive(Debug, Args)]
pub struct OperatorArgs {
    /// Name recorded in the audit log.
    #[arg(long, env = "VMETER_OPERATOR", default_value = "vmeterctl")]
    operator: String,
}

#[derive(Debug, Args)]
pub struct SeedArgs {
    /// Counter key as `<device>/<counter>`.
    key: CounterKey,
    #[arg(long, default_value_t = 0.0)]
    imported: f64,
    #[arg(long, default_value_t = 0.0)]
    exported: f64,
    /// Unit of the given totals, e.g. `Wh`, `kWh`, `MWh`.
    #[arg(long, default_value = "Wh")]
    unit: String,
    /// Overwrite an existing entry.
    #[arg(long)]
    force: bool,
    #[command(flatten)]
    operator: OperatorArgs,
}

pub fn run(command: LedgerCommand, config: &AppConfig) -> Result<()> {
    if config.ledger.backend == LedgerBackend::Memory {
        bail!("ledger backend is 'memory'; there is no persisted ledger to administer");
    }
    match command {
        LedgerCommand::List { json } => list(config, json),
        LedgerCommand::Reset { key, operator } => {
            let previous = admin(config)?.reset(&key, &operator.operator)?;
            match previous {
                Some(entry) => println!(
                    "Reset {key} (was imported {:.3} Wh, exported {:.3} Wh)",
                    entry.imported_wh, entry.exported_wh
                ),
                None => println!("Reset {key} (no previous entry)"),
            }
            Ok(())
        }
        LedgerCommand::Seed(args) => seed(config, args),
        LedgerCommand::Audit => audit(config),
        LedgerCommand::Verify => {
            let path = &config.ledger.path;
            if !FileLedger::verify(path) {
                bail!("ledger {} is missing or failed its integrity check", path.display());
            }
            println!("Ledger {} ok", path.display());
            Ok(())
        }
    }
}

fn admin(config: &AppConfig) -> Result<LedgerAdmin> {
    let integrator = EnergyIntegrator::new(open_ledger(config)?, config.integrator.clone());
    let audit = AuditLog::open(&config.audit.path)
        .with_context(|| format!("opening audit log {}", config.audit.path.display()))?;
    Ok(LedgerAdmin::new(Arc::new(integrator), Arc::new(SystemClock)).with_audit(Arc::new(audit)))
}

fn list(config: &AppConfig, json: bool) -> Result<()> {
    let path = &config.ledger.path;
    let entries = FileLedger::read_entries(path)
        .with_context(|| format!("reading counter ledger {}", path.display()))?;
    if json {
        let by_key: IndexMap<String, LedgerEntry> = entries
            .into_iter()
            .map(|(key, entry)| (key.to_string(), entry))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_key)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No counters recorded in {}", path.display());
        return Ok(());
    }
    println!(
        "{:<32} {:>16} {:>16}  {}",
        "COUNTER", "IMPORTED_WH", "EXPORTED_WH", "LAST_SAMPLE"
    );
    for (key, entry) in entries {
        println!(
            "{:<32} {:>16.3} {:>16.3}  {}",
            key.to_string(),
            entry.imported_wh,
            entry.exported_wh,
            entry.last_timestamp.to_rfc3339()
        );
    }
    Ok(())
}

fn seed(config: &AppConfig, args: SeedArgs) -> Result<()> {
    let unit = Some(args.unit.as_str());
    let imported = scale_metric(args.imported, unit, BaseUnit::WattHour)?;
    let exported = scale_metric(args.exported, unit, BaseUnit::WattHour)?;
    let entry = admin(config)?.seed(
        &args.key,
        imported,
        exported,
        args.force,
        &args.operator.operator,
    )?;
    println!(
        "Seeded {} with imported {:.3} Wh, exported {:.3} Wh",
        args.key, entry.imported_wh, entry.exported_wh
    );
    Ok(())
}

fn audit(config: &AppConfig) -> Result<()> {
    let path = &config.audit.path;
    if !path.exists() {
        println!("No audit log at {}", path.display());
        return Ok(());
    }
    let count = replay(path, |entry| {
        let detail = match &entry.action {
            AuditAction::Reset { key, .. } => format!("reset {key}"),
            AuditAction::Seed {
                key,
                imported_wh,
                exported_wh,
                ..
            } => format!("seed {key} imported={imported_wh} exported={exported_wh}"),
        };
        println!(
            "#{:<5} {} {:<12} {}",
            entry.sequence,
            entry.timestamp.to_rfc3339(),
            entry.operator,
            detail
        );
        Ok(())
    })?;
    println!("{count} audit entries");
    Ok(())
}
