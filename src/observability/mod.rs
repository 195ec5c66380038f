//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `cochain_switches` | Counter | Cothread switches performed |
//! | `cochain_items_handed_off` | Counter | Items deposited into rendezvous slots |
//! | `cochain_direct_calls` | Counter | Items moved by direct calls |
//! | `cochain_iterations` | Counter | Completed chain sweeps |
//! | `cochain_element_errors` | Counter | Element entry points that failed |
//! | `cochain_chains` | Gauge | Chains owned by a scheduler |
//! | `cochain_cothreads` | Gauge | Cothreads allocated by a scheduler |
//!
//! All metrics carry a `scheduler` label.
//!
//! ## Tracing
//!
//! cochain emits spans for each `iterate` call and for element code running
//! on a cothread. Structural changes (chain create, merge, destroy, wiring)
//! are logged at `debug`, switches and slot hand-offs at `trace`.
//!
//! ```rust,ignore
//! use cochain::observability::init_metrics;
//!
//! init_metrics();
//! // Install any metrics exporter to collect the values.
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{SchedulerMetrics, init_metrics};
pub use tracing_support::{
    instrument_iterate, span_element, span_iterate, span_pipeline, trace_eos, trace_error,
    trace_state_change,
};
