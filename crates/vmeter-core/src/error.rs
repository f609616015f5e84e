//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error and anomaly types surfaced by the core."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use thiserror::Error;
use vmeter_persistence::{CounterKey, PersistenceError};

use crate::state::ComponentId;

/// What a failed durable write was about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DegradedTarget {
    Counter(CounterKey),
    Component(ComponentId),
}

impl fmt::Display for DegradedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedTarget::Counter(key) => write!(f, "counter {key}"),
            DegradedTarget::Component(id) => write!(f, "component {id}"),
        }
    }
}

/// A durable write failed while the in-memory state was updated anyway.
#[derive(Debug, Error)]
#[error("persistence degraded for {target}: {source}")]
pub struct PersistenceDegraded {
    pub target: DegradedTarget,
    pub source: PersistenceError,
}

impl PersistenceDegraded {
    pub fn counter(key: &CounterKey, source: PersistenceError) -> Self {
        Self {
            target: DegradedTarget::Counter(key.clone()),
            source,
        }
    }

    pub fn component(id: ComponentId, source: PersistenceError) -> Self {
        Self {
            target: DegradedTarget::Component(id),
            source,
        }
    }
}

/// Elapsed-time problems detected by the integrator. Neither adds energy.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ElapsedAnomaly {
    #[error("clock regression: sample is {behind_secs:.3} s older than the last one")]
    ClockRegression { behind_secs: f64 },
    #[error("implausible elapsed time {elapsed_secs:.0} s exceeds ceiling of {ceiling_secs:.0} s")]
    ImplausibleElapsedTime { elapsed_secs: f64, ceiling_secs: f64 },
}

impl ElapsedAnomaly {
    /// Static label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ElapsedAnomaly::ClockRegression { .. } => "clock_regression",
            ElapsedAnomaly::ImplausibleElapsedTime { .. } => "implausible_elapsed",
        }
    }
}

/// Failures of administrative ledger operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("counter {0} already has a ledger entry; pass force to overwrite")]
    AlreadyPresent(CounterKey),
    #[error("invalid totals for {key}: imported={imported_wh}, exported={exported_wh}")]
    InvalidTotals {
        key: CounterKey,
        imported_wh: f64,
        exported_wh: f64,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
