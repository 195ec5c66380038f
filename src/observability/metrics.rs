//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const SWITCHES: &str = "cochain_switches";
const ITEMS_HANDED_OFF: &str = "cochain_items_handed_off";
const DIRECT_CALLS: &str = "cochain_direct_calls";
const ITERATIONS: &str = "cochain_iterations";
const ELEMENT_ERRORS: &str = "cochain_element_errors";
const CHAINS: &str = "cochain_chains";
const COTHREADS: &str = "cochain_cothreads";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(SWITCHES, Unit::Count, "Cothread switches performed");
    metrics::describe_counter!(
        ITEMS_HANDED_OFF,
        Unit::Count,
        "Items deposited into rendezvous slots"
    );
    metrics::describe_counter!(
        DIRECT_CALLS,
        Unit::Count,
        "Items moved by direct calls into a peer element"
    );
    metrics::describe_counter!(ITERATIONS, Unit::Count, "Completed chain sweeps");
    metrics::describe_counter!(
        ELEMENT_ERRORS,
        Unit::Count,
        "Element entry points that returned an error"
    );
    metrics::describe_gauge!(CHAINS, Unit::Count, "Chains owned by the scheduler");
    metrics::describe_gauge!(COTHREADS, Unit::Count, "Cothreads allocated by the scheduler");
}

/// Metrics collector for one scheduler.
///
/// Handles are created once with the scheduler label attached.
#[derive(Clone)]
pub struct SchedulerMetrics {
    scheduler: String,
    switches: Counter,
    handoffs: Counter,
    direct_calls: Counter,
    iterations: Counter,
    errors: Counter,
    chains: Gauge,
    cothreads: Gauge,
}

impl SchedulerMetrics {
    /// Create a collector labelled with the scheduler name.
    pub fn new(scheduler: &str) -> Self {
        Self {
            scheduler: scheduler.to_string(),
            switches: counter!(SWITCHES, "scheduler" => scheduler.to_string()),
            handoffs: counter!(ITEMS_HANDED_OFF, "scheduler" => scheduler.to_string()),
            direct_calls: counter!(DIRECT_CALLS, "scheduler" => scheduler.to_string()),
            iterations: counter!(ITERATIONS, "scheduler" => scheduler.to_string()),
            errors: counter!(ELEMENT_ERRORS, "scheduler" => scheduler.to_string()),
            chains: gauge!(CHAINS, "scheduler" => scheduler.to_string()),
            cothreads: gauge!(COTHREADS, "scheduler" => scheduler.to_string()),
        }
    }

    /// Record a cothread switch.
    #[inline]
    pub fn record_switch(&self) {
        self.switches.increment(1);
    }

    /// Record an item deposited into a rendezvous slot.
    #[inline]
    pub fn record_handoff(&self) {
        self.handoffs.increment(1);
    }

    /// Record an item moved by a direct call.
    #[inline]
    pub fn record_direct_call(&self) {
        self.direct_calls.increment(1);
    }

    /// Record a completed sweep.
    #[inline]
    pub fn record_iteration(&self) {
        self.iterations.increment(1);
    }

    /// Record an element failure.
    #[inline]
    pub fn record_error(&self) {
        self.errors.increment(1);
    }

    /// Record the number of chains.
    #[inline]
    pub fn record_chains(&self, chains: usize) {
        self.chains.set(chains as f64);
    }

    /// Record the number of allocated cothreads.
    #[inline]
    pub fn record_cothreads(&self, cothreads: usize) {
        self.cothreads.set(cothreads as f64);
    }

    /// Get the scheduler name.
    pub fn scheduler(&self) -> &str {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_scheduler_metrics() {
        let metrics = SchedulerMetrics::new("sched-test");
        metrics.record_switch();
        metrics.record_handoff();
        metrics.record_direct_call();
        metrics.record_iteration();
        metrics.record_error();
        metrics.record_chains(2);
        metrics.record_cothreads(3);
        assert_eq!(metrics.scheduler(), "sched-test");
    }
}
