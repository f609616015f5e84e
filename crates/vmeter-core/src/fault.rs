//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Escalation of repeated persistence failures."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Persistence failures never stop the pipeline, but a streak of them must not
//! go unnoticed. [`FaultTracker`] counts consecutive failures per target and
//! hands the streak to a [`FaultReporter`] once the threshold is reached.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::error::{DegradedTarget, PersistenceDegraded};
use crate::metrics::CounterMetrics;

/// Receiver for escalated persistence faults, e.g. an alerting channel.
pub trait FaultReporter: Send + Sync + fmt::Debug {
    /// Called once per streak when `consecutive` reaches the threshold.
    fn escalate(&self, fault: &PersistenceDegraded, consecutive: u32);

    /// Called when a write succeeds after an escalated streak.
    fn recovered(&self, target: &DegradedTarget, failures: u32);
}

/// Reports escalations through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaultReporter;

impl FaultReporter for LogFaultReporter {
    fn escalate(&self, fault: &PersistenceDegraded, consecutive: u32) {
        error!(
            target_id = %fault.target,
            consecutive,
            error = %fault.source,
            "persistence keeps failing; state is held in memory only"
        );
    }

    fn recovered(&self, target: &DegradedTarget, failures: u32) {
        info!(target_id = %target, failures, "persistence recovered");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStatus {
    Healthy,
    Failing { consecutive: u32 },
    Escalated { consecutive: u32 },
}

impl FaultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultStatus::Healthy => "healthy",
            FaultStatus::Failing { .. } => "failing",
            FaultStatus::Escalated { .. } => "escalated",
        }
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    consecutive: u32,
    escalated: bool,
}

/// Consecutive-failure bookkeeping shared by the integrator and value store.
#[derive(Debug)]
pub struct FaultTracker {
    escalate_after: u32,
    reporter: Arc<dyn FaultReporter>,
    streaks: Mutex<HashMap<DegradedTarget, Streak>>,
    /// Number of entries in `streaks`; lets the success path skip the lock.
    open_streaks: AtomicUsize,
    metrics: Option<CounterMetrics>,
}

impl FaultTracker {
    pub fn new(escalate_after: u32, reporter: Arc<dyn FaultReporter>) -> Self {
        Self {
            escalate_after: escalate_after.max(1),
            reporter,
            streaks: Mutex::new(HashMap::new()),
            open_streaks: AtomicUsize::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: CounterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Count a failed write and escalate when the streak hits the threshold.
    pub fn record_failure(&self, fault: &PersistenceDegraded) -> FaultStatus {
        let (status, escalate) = {
            let mut streaks = self.streaks.lock();
            let streak = streaks.entry(fault.target.clone()).or_insert_with(|| {
                self.open_streaks.fetch_add(1, Ordering::Release);
                Streak::default()
            });
            streak.consecutive = streak.consecutive.saturating_add(1);
            let escalate = !streak.escalated && streak.consecutive >= self.escalate_after;
            if escalate {
                streak.escalated = true;
            }
            let status = if streak.escalated {
                FaultStatus::Escalated {
                    consecutive: streak.consecutive,
                }
            } else {
                FaultStatus::Failing {
                    consecutive: streak.consecutive,
                }
            };
            (status, escalate)
        };

        if escalate {
            if let Some(metrics) = &self.metrics {
                metrics.record_escalation(&fault.target.to_string());
            }
            if let FaultStatus::Escalated { consecutive } = status {
                self.reporter.escalate(fault, consecutive);
            }
        }
        status
    }

    /// Clear the streak for `target` after a successful write.
    pub fn record_success(&self, target: &DegradedTarget) {
        if self.open_streaks.load(Ordering::Acquire) == 0 {
            return;
        }
        let cleared = {
            let mut streaks = self.streaks.lock();
            let cleared = streaks.remove(target);
            if cleared.is_some() {
                self.open_streaks.fetch_sub(1, Ordering::Release);
            }
            cleared
        };
        if let Some(streak) = cleared {
            if streak.escalated {
                self.reporter.recovered(target, streak.consecutive);
            }
        }
    }

    pub fn status(&self, target: &DegradedTarget) -> FaultStatus {
        match self.streaks.lock().get(target) {
            None => FaultStatus::Healthy,
            Some(streak) if streak.escalated => FaultStatus::Escalated {
                consecutive: streak.consecutive,
            },
            Some(streak) => FaultStatus::Failing {
                consecutive: streak.consecutive,
            },
        }
    }
}
