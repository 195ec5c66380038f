//! Cothread bodies that drive elements.
//!
//! Each element in a wired chain runs one of three wrappers, picked by its
//! [`Capability`]. A wrapper loops over the element's pads until its stop
//! flag is raised (the chain's entry gets one per sweep) or the element is
//! disabled, then returns, which hands control back to the controller.

use super::registry::{ElementHandle, ElementId};
use super::runtime::Runtime;
use crate::cothread::CothreadFlags;
use crate::element::{Capability, Element, ElementContext, PadDirection};
use crate::error::{Error, Result};
use crate::observability::span_element;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard, PoisonError, Weak};

/// Build the body of an element's cothread.
///
/// Errors and panics of the element are recorded on the runtime, which
/// disables the element and makes `iterate` report the failure.
pub(crate) fn cothread_body(
    rt: Weak<Runtime>,
    element: ElementId,
) -> impl FnMut(&CothreadFlags) + Send + 'static {
    move |flags| {
        let Some(rt) = rt.upgrade() else {
            return;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| drive(&rt, element, flags)))
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));
        match outcome {
            Ok(()) | Err(Error::Shutdown) => {}
            Err(_) if flags.is_cancelled() => {}
            Err(err) => rt.fail_element(element, err),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn drive(rt: &Arc<Runtime>, element: ElementId, flags: &CothreadFlags) -> Result<()> {
    let (capability, handle, name) = {
        let reg = rt.graph.lock();
        let entry = reg.element(element)?;
        let capability = entry
            .capability
            .ok_or_else(|| Error::InvalidState(format!("{} is not wired", entry.name)))?;
        (capability, Arc::clone(&entry.handle), entry.name.clone())
    };
    let _span = span_element(&rt.name, &name, capability_name(capability)).entered();
    let mut ctx = ElementContext::new(rt, element);

    loop {
        let progressed = match capability {
            Capability::Loop => {
                let before = ctx.transfers();
                lock(&handle).run_loop(&mut ctx)?;
                ctx.transfers() != before
            }
            Capability::Push => push_pass(&handle, &mut ctx)?,
            Capability::Pull => pull_pass(&handle, &mut ctx)?,
        };

        if flags.take_stop() || flags.is_cancelled() || !rt.is_enabled(element) {
            return Ok(());
        }
        if !progressed {
            // Nothing to do until something else runs.
            rt.yield_to_main()?;
        }
    }
}

/// The element is locked only while one of its entry points runs, so
/// other schedulers can call into it while this cothread waits on a pad.
fn lock(handle: &ElementHandle) -> MutexGuard<'_, Box<dyn Element>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One item from every sink pad, in pad order.
fn push_pass(handle: &ElementHandle, ctx: &mut ElementContext<'_>) -> Result<bool> {
    let mut obtained = false;
    for pad in ctx.pads(PadDirection::Sink) {
        if ctx.is_eos(pad) {
            continue;
        }
        let Some(item) = ctx.pull(pad)? else {
            continue;
        };
        obtained = true;
        let eos = item.is_eos();
        lock(handle).handle_item(pad, item, ctx)?;
        if eos {
            ctx.mark_eos(pad)?;
            if ctx.inputs_finished() {
                ctx.set_eos()?;
                return Ok(true);
            }
        }
    }
    Ok(obtained)
}

/// One item for every source pad, in pad order.
fn pull_pass(handle: &ElementHandle, ctx: &mut ElementContext<'_>) -> Result<bool> {
    let pads = ctx.pads(PadDirection::Src);
    if pads.is_empty() {
        return Ok(false);
    }
    for pad in pads {
        let produced = lock(handle).produce_item(pad, ctx)?;
        match produced {
            Some(item) if !item.is_eos() => ctx.push(pad, item)?,
            _ => {
                ctx.set_eos()?;
                return Ok(true);
            }
        }
    }
    Ok(true)
}

fn capability_name(capability: Capability) -> &'static str {
    match capability {
        Capability::Loop => "loop",
        Capability::Push => "push",
        Capability::Pull => "pull",
    }
}
