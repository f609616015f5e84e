//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Canonical component state records."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Vendor-independent state records published per component.
//!
//! Every record carries `power`, `imported` and `exported`; the remaining
//! fields depend on the component kind. Records are replaced wholesale in the
//! value store, never merged.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a configured component (counter, battery, inverter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ComponentId {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.parse().map(ComponentId)
    }
}

impl From<u32> for ComponentId {
    fn from(id: u32) -> Self {
        ComponentId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Counter,
    Battery,
    Inverter,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Counter => "counter",
            ComponentKind::Battery => "battery",
            ComponentKind::Inverter => "inverter",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const NOMINAL_VOLTAGE: f64 = 230.0;
const NOMINAL_FREQUENCY: f64 = 50.0;

/// Grid or consumption meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    /// Signed active power in W, positive when drawing from the grid.
    pub power: f64,
    /// Cumulative imported energy in Wh.
    pub imported: f64,
    /// Cumulative exported energy in Wh.
    pub exported: f64,
    pub voltages: [f64; 3],
    pub currents: [f64; 3],
    pub powers: [f64; 3],
    pub power_factors: [f64; 3],
    /// Hz.
    pub frequency: f64,
}

impl Default for CounterState {
    fn default() -> Self {
        Self {
            power: 0.0,
            imported: 0.0,
            exported: 0.0,
            voltages: [NOMINAL_VOLTAGE; 3],
            currents: [0.0; 3],
            powers: [0.0; 3],
            power_factors: [0.0; 3],
            frequency: NOMINAL_FREQUENCY,
        }
    }
}

impl CounterState {
    pub fn new(power: f64, imported: f64, exported: f64) -> Self {
        Self {
            power,
            imported,
            exported,
            ..Self::default()
        }
    }
}

/// Stationary battery storage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatState {
    /// Signed power in W, positive while charging.
    pub power: f64,
    pub imported: f64,
    pub exported: f64,
    /// State of charge in percent.
    pub soc: f64,
    pub currents: [f64; 3],
}

impl BatState {
    pub fn new(power: f64, soc: f64, imported: f64, exported: f64) -> Self {
        Self {
            power,
            imported,
            exported,
            soc,
            currents: [0.0; 3],
        }
    }
}

/// PV or hybrid inverter. Inverters only feed in, so `imported` is always zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InverterState {
    /// Signed AC power in W, negative while producing.
    pub power: f64,
    pub exported: f64,
    pub currents: [f64; 3],
    #[serde(default)]
    pub dc_power: Option<f64>,
}

/// Canonical record stored per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ComponentState {
    Counter(CounterState),
    Battery(BatState),
    Inverter(InverterState),
}

impl ComponentState {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentState::Counter(_) => ComponentKind::Counter,
            ComponentState::Battery(_) => ComponentKind::Battery,
            ComponentState::Inverter(_) => ComponentKind::Inverter,
        }
    }

    pub fn power(&self) -> f64 {
        match self {
            ComponentState::Counter(state) => state.power,
            ComponentState::Battery(state) => state.power,
            ComponentState::Inverter(state) => state.power,
        }
    }

    pub fn imported(&self) -> f64 {
        match self {
            ComponentState::Counter(state) => state.imported,
            ComponentState::Battery(state) => state.imported,
            ComponentState::Inverter(_) => 0.0,
        }
    }

    pub fn exported(&self) -> f64 {
        match self {
            ComponentState::Counter(state) => state.exported,
            ComponentState::Battery(state) => state.exported,
            ComponentState::Inverter(state) => state.exported,
        }
    }
}

impl From<CounterState> for ComponentState {
    fn from(state: CounterState) -> Self {
        ComponentState::Counter(state)
    }
}

impl From<BatState> for ComponentState {
    fn from(state: BatState) -> Self {
        ComponentState::Battery(state)
    }
}

impl From<InverterState> for ComponentState {
    fn from(state: InverterState) -> Self {
        ComponentState::Inverter(state)
    }
}
