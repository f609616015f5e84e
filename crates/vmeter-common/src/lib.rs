//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the vmeter workspace.
//! This crate exposes configuration loading, tracing initialisation, and the
//! clock abstraction consumed by the energy integrator.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, AuditConfig, IntegratorConfig, LedgerBackend, LedgerConfig, LoggingConfig,
    SeedConfig, StoreConfig,
};
pub use logging::{init, init_tracing, LogFormat};
pub use time::{elapsed_hours, unix_seconds, Clock, ManualClock, SystemClock};
