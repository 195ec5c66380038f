//! Moving items across pads.
//!
//! Inside a chain, a link is a capacity-one slot on the sink pad. The
//! producer deposits and switches to the consumer; the consumer takes and,
//! when the slot is empty, switches to the producer. Both sides resolve the
//! peer again after every wake-up because the graph may have been rewired
//! while they were suspended.
//!
//! Links leaving the chain are plain calls into the peer element on the
//! caller's stack. Across schedulers the peer may be parked inside one of
//! its own entry points; a push then yields and retries on a later sweep
//! instead of waiting for it.

use super::registry::{ElementHandle, ElementId, PadId, Route};
use super::runtime::{Runtime, attribute};
use crate::element::{Element, ElementContext};
use crate::error::{Error, Result};
use crate::item::Item;
use crate::observability::trace_eos;
use std::sync::{MutexGuard, TryLockError};
use tracing::{debug, trace, warn};

/// Lock a peer for a direct call.
///
/// `None` means a peer of another scheduler is busy: it is running or is
/// parked by its own scheduler in the middle of an entry point. Inside one
/// scheduler a held lock can only mean re-entry.
fn lock_peer<'h>(
    handle: &'h ElementHandle,
    name: &str,
    foreign: bool,
) -> Result<Option<MutexGuard<'h, Box<dyn Element>>>> {
    match handle.try_lock() {
        Ok(guard) => Ok(Some(guard)),
        Err(TryLockError::Poisoned(poisoned)) => Ok(Some(poisoned.into_inner())),
        Err(TryLockError::WouldBlock) if foreign => Ok(None),
        Err(TryLockError::WouldBlock) => Err(Error::Deadlock(name.to_string())),
    }
}

/// Push an item out of a source pad.
pub(crate) fn push(rt: &Runtime, pad: PadId, item: Item) -> Result<()> {
    let mut pending = Some(item);
    loop {
        let route = rt.graph.lock().route(pad, rt.id)?;
        match route {
            Route::Unlinked => {
                warn!(pad = %pad, "push on unlinked pad, dropping item");
                return Ok(());
            }
            Route::Direct {
                peer,
                element,
                name,
                handle,
                foreign,
                decoupled,
                ..
            } => {
                let Some(mut guard) = lock_peer(&handle, &name, foreign)? else {
                    // Try again once the other scheduler has moved on.
                    trace!(pad = %pad, peer = %name, "peer busy");
                    rt.yield_to_main()?;
                    continue;
                };
                let Some(item) = pending.take() else {
                    return Ok(());
                };
                rt.metrics.record_direct_call();
                let eos = item.is_eos();
                let mut ctx = ElementContext::new(rt, element);
                guard
                    .handle_item(peer, item, &mut ctx)
                    .map_err(|e| attribute(&name, e))?;
                drop(guard);
                if eos && !decoupled {
                    ctx.mark_eos(peer)?;
                    if ctx.inputs_finished() {
                        ctx.set_eos()?;
                    }
                }
                return Ok(());
            }
            Route::Rendezvous {
                peer,
                element,
                cothread,
                active,
            } => {
                if cothread == rt.cothreads.current() {
                    return Err(Error::Deadlock(format!("{element} pushes to itself")));
                }
                if deposit(rt, peer, element, &mut pending)? {
                    rt.metrics.record_handoff();
                    trace!(pad = %peer, "item deposited");
                    if active {
                        rt.switch_to(cothread)?;
                    }
                    return Ok(());
                }
                // Slot still full: let the consumer drain it, or wait for
                // the controller if the consumer is paused.
                if active {
                    rt.switch_to(cothread)?;
                } else {
                    rt.yield_to_main()?;
                }
            }
        }
    }
}

/// Put the pending item into the slot of `sink` if it is free.
///
/// A flush always goes in, replacing whatever is waiting.
fn deposit(
    rt: &Runtime,
    sink: PadId,
    consumer: ElementId,
    pending: &mut Option<Item>,
) -> Result<bool> {
    let mut reg = rt.graph.lock();
    let flush = pending.as_ref().is_some_and(Item::is_flush);
    let entry = reg.pad_mut(sink)?;
    if entry.slot.is_some() && !flush {
        return Ok(false);
    }
    if let Some(stale) = entry.slot.take() {
        debug!(pad = %sink, item = ?stale, "flush dropped queued item");
    }
    entry.slot = pending.take();
    if entry.select_waiter {
        reg.element_mut(consumer)?.select_pad = Some(sink);
    }
    Ok(true)
}

/// Pull an item into a sink pad.
///
/// Returns `None` when nothing can arrive right now: the pad is unlinked,
/// the producer is paused or busy, or it runs on another scheduler that
/// pushes its output itself.
pub(crate) fn pull(rt: &Runtime, pad: PadId) -> Result<Option<Item>> {
    loop {
        let route = {
            let mut reg = rt.graph.lock();
            if let Some(item) = reg.pad_mut(pad)?.slot.take() {
                return Ok(Some(item));
            }
            reg.route(pad, rt.id)?
        };
        match route {
            Route::Unlinked => return Ok(None),
            Route::Direct {
                peer,
                element,
                name,
                handle,
                foreign,
                driven,
                decoupled,
            } => {
                if driven {
                    // Its own scheduler runs it and pushes what it makes.
                    return Ok(None);
                }
                let Some(mut guard) = lock_peer(&handle, &name, foreign)? else {
                    return Ok(None);
                };
                rt.metrics.record_direct_call();
                let produced = {
                    let mut ctx = ElementContext::new(rt, element);
                    guard
                        .produce_item(peer, &mut ctx)
                        .map_err(|e| attribute(&name, e))?
                };
                drop(guard);
                if produced.is_some() || decoupled {
                    return Ok(produced);
                }
                // A direct producer that ran dry is finished.
                finish_producer(rt, element)?;
                return Ok(Some(Item::eos()));
            }
            Route::Rendezvous {
                element,
                cothread,
                active,
                ..
            } => {
                if !active {
                    return Ok(None);
                }
                if cothread == rt.cothreads.current() {
                    return Err(Error::Deadlock(format!("{element} pulls from itself")));
                }
                rt.switch_to(cothread)?;
            }
        }
    }
}

fn finish_producer(rt: &Runtime, element: ElementId) -> Result<()> {
    let mut reg = rt.graph.lock();
    reg.set_enabled(element, false)?;
    let entry = reg.element_mut(element)?;
    if !entry.eos {
        entry.eos = true;
        trace_eos(&rt.name, &entry.name);
    }
    Ok(())
}

/// Wait until one of `pads` has an item and return it.
pub(crate) fn select(rt: &Runtime, element: ElementId, pads: &[PadId]) -> Result<PadId> {
    let Some(&first) = pads.first() else {
        return Err(Error::InvalidState("select needs at least one pad".into()));
    };

    let mut round = 0usize;
    loop {
        let producers = {
            let mut reg = rt.graph.lock();
            let recorded = reg.element_mut(element)?.select_pad.take();
            if let Some(ready) = recorded.filter(|pad| pads.contains(pad)) {
                clear_waiters(&mut reg, pads);
                return Ok(ready);
            }

            let mut linked = false;
            let mut producers = Vec::new();
            for &pad in pads {
                if reg.pad(pad)?.slot.is_some() {
                    clear_waiters(&mut reg, pads);
                    return Ok(pad);
                }
                match reg.route(pad, rt.id)? {
                    Route::Unlinked => {}
                    Route::Direct { .. } => {
                        clear_waiters(&mut reg, pads);
                        return Ok(pad);
                    }
                    Route::Rendezvous {
                        cothread, active, ..
                    } => {
                        linked = true;
                        if active && !producers.contains(&cothread) {
                            producers.push(cothread);
                        }
                    }
                }
            }

            if !linked {
                clear_waiters(&mut reg, pads);
                return Err(Error::NotLinked(first));
            }
            if producers.is_empty() {
                // Every producer is paused; the pull that follows sees nothing.
                clear_waiters(&mut reg, pads);
                return Ok(first);
            }
            for &pad in pads {
                reg.pad_mut(pad)?.select_waiter = true;
            }
            producers
        };

        let target = producers[round % producers.len()];
        round += 1;
        rt.switch_to(target)?;
    }
}

fn clear_waiters(reg: &mut super::registry::Registry, pads: &[PadId]) {
    for pad in pads {
        if let Ok(entry) = reg.pad_mut(*pad) {
            entry.select_waiter = false;
        }
    }
}
