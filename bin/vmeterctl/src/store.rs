//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Value store inspection subcommands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use clap::Subcommand;
use indexmap::IndexMap;
use vmeter_common::AppConfig;
use vmeter_core::{ComponentId, ComponentState, JsonStateSink, StateSink};

#[derive(Debug, Subcommand)]
pub enum StoreCommand {
    /// Show the last persisted state of one or all components.
    Show {
        /// Component id; all components when omitted.
        id: Option<ComponentId>,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: StoreCommand, config: &AppConfig) -> Result<()> {
    if !config.store.durable {
        bail!("store.durable is disabled; component states are not persisted");
    }
    match command {
        StoreCommand::Show { id, json } => show(config, id, json),
    }
}

fn show(config: &AppConfig, id: Option<ComponentId>, json: bool) -> Result<()> {
    let sink = JsonStateSink::new(&config.store.directory);
    let states: IndexMap<ComponentId, ComponentState> = sink
        .load_all()?
        .into_iter()
        .filter(|(component, _)| id.map_or(true, |wanted| wanted == *component))
        .collect();

    if let Some(wanted) = id {
        if states.is_empty() {
            bail!("no persisted state for component {wanted}");
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }
    if states.is_empty() {
        println!("No component states in {}", sink.directory().display());
        return Ok(());
    }
    println!(
        "{:<6} {:<9} {:>12} {:>16} {:>16}",
        "ID", "KIND", "POWER_W", "IMPORTED_WH", "EXPORTED_WH"
    );
    for (component, state) in &states {
        println!(
            "{:<6} {:<9} {:>12.1} {:>16.3} {:>16.3}",
            component.to_string(),
            state.kind().as_str(),
            state.power(),
            state.imported(),
            state.exported()
        );
    }
    Ok(())
}
