//! State shared between a scheduler and the cothreads it drives.

use super::registry::{ElementId, Graph, SchedulerId};
use crate::cothread::{CothreadContext, CothreadId};
use crate::error::{Error, Result};
use crate::observability::{SchedulerMetrics, trace_error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Flag through which a controller asks a running `iterate` to stop early.
///
/// Clones share the flag. While it is set, `iterate` returns
/// [`IterateState::Interrupted`](super::IterateState::Interrupted) after the
/// next cothread switch comes back.
#[derive(Debug, Clone, Default)]
pub struct StateChangeHandle {
    pending: Arc<AtomicBool>,
}

impl StateChangeHandle {
    /// Mark a state change as pending.
    pub fn request(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Clear the pending state change.
    pub fn clear(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Whether a state change is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

pub(crate) struct Runtime {
    pub(crate) id: SchedulerId,
    pub(crate) name: String,
    pub(crate) graph: Graph,
    pub(crate) cothreads: CothreadContext,
    pub(crate) state_change: StateChangeHandle,
    pub(crate) metrics: SchedulerMetrics,
    interrupt: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl Runtime {
    pub(crate) fn new(
        id: SchedulerId,
        name: String,
        graph: Graph,
        cothreads: CothreadContext,
    ) -> Self {
        let metrics = SchedulerMetrics::new(&name);
        Self {
            id,
            name,
            graph,
            cothreads,
            state_change: StateChangeHandle::default(),
            metrics,
            interrupt: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn switch_to(&self, target: CothreadId) -> Result<()> {
        self.metrics.record_switch();
        self.cothreads.switch_to(target)
    }

    /// Hand control back to the controller until the next switch in.
    pub(crate) fn yield_to_main(&self) -> Result<()> {
        if self.cothreads.is_main() {
            return Err(Error::InvalidState(
                "element code must run on a cothread to wait".into(),
            ));
        }
        self.switch_to(CothreadId::MAIN)
    }

    pub(crate) fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_enabled(&self, element: ElementId) -> bool {
        self.graph
            .lock()
            .element(element)
            .is_ok_and(|entry| entry.enabled)
    }

    /// Disable a failed element and keep its error for `iterate` to report.
    pub(crate) fn fail_element(&self, element: ElementId, err: Error) {
        let name = {
            let mut reg = self.graph.lock();
            let name = reg
                .element(element)
                .map(|entry| entry.name.clone())
                .unwrap_or_else(|_| element.to_string());
            if let Err(err) = reg.set_enabled(element, false) {
                warn!(scheduler = %self.name, element = %name, error = %err, "could not disable failed element");
            }
            name
        };
        let err = attribute(&name, err);
        trace_error(&self.name, &name, &err);
        self.metrics.record_error();

        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    pub(crate) fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Tag an error with the element it came from, unless it already is.
pub(crate) fn attribute(element: &str, err: Error) -> Error {
    match err {
        Error::Element { .. } | Error::Shutdown => err,
        other => Error::Element {
            element: element.to_string(),
            source: Box::new(other),
        },
    }
}
