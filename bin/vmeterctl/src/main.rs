//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for simulated counters and stored states."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vmeter_common::{logging, AppConfig};

mod ledger;
mod store;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "vmeter administrative control utility",
    long_about = None
)]
struct Cli {
    /// Configuration file; `VMETER_CONFIG` takes precedence when set.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Inspect and administer simulated counter totals")]
    Ledger(ledger::LedgerCommand),
    #[command(subcommand, about = "Inspect persisted component states")]
    Store(store::StoreCommand),
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    match cli.command {
        Commands::Ledger(cmd) => ledger::run(cmd, &config)?,
        Commands::Store(cmd) => store::run(cmd, &config)?,
    }
    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("configs/vmeter.toml"));
    candidates.push(PathBuf::from("configs/vmeter.example.toml"));
    AppConfig::load(&candidates)
}
