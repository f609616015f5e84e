//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Energy-counter simulation and component value store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Energy integration, per-component value store and their start-up wiring.

pub mod admin;
pub mod error;
pub mod fault;
pub mod integrator;
pub mod locks;
pub mod metrics;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod units;

pub use admin::LedgerAdmin;
pub use error::{AdminError, DegradedTarget, ElapsedAnomaly, PersistenceDegraded};
pub use fault::{FaultReporter, FaultStatus, FaultTracker, LogFaultReporter};
pub use integrator::{EnergyIntegrator, EnergySource, Integration, SimCounter};
pub use locks::{KeyedLocks, WriteGate};
pub use metrics::CounterMetrics;
pub use pipeline::{open_ledger, Pipeline};
pub use state::{BatState, ComponentId, ComponentKind, ComponentState, CounterState, InverterState};
pub use store::{JsonStateSink, StateSink, ValueSlot, ValueStore};
pub use units::{scale_metric, BaseUnit, UnitError};
