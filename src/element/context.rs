//! The pad interface seen by element code.
//!
//! An [`ElementContext`] is handed to every element entry point. Pushing and
//! pulling through it either calls the peer directly or goes through the
//! rendezvous slot and switches cothreads, depending on how the link was
//! wired. Element code cannot tell the difference.

use crate::element::PadDirection;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::observability::trace_eos;
use crate::scheduler::rendezvous;
use crate::scheduler::runtime::Runtime;
use crate::scheduler::{ElementId, PadId, SchedulerId};

/// Runtime context for one element while its code runs.
pub struct ElementContext<'a> {
    rt: &'a Runtime,
    element: ElementId,
    transfers: u64,
}

impl<'a> ElementContext<'a> {
    pub(crate) fn new(rt: &'a Runtime, element: ElementId) -> Self {
        Self {
            rt,
            element,
            transfers: 0,
        }
    }

    /// Items pushed or pulled through this context so far.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// The element this context belongs to.
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// The scheduler driving the current cothread.
    pub fn scheduler(&self) -> SchedulerId {
        self.rt.id
    }

    /// Name of the element.
    pub fn name(&self) -> String {
        self.rt
            .graph
            .lock()
            .element(self.element)
            .map(|entry| entry.name.clone())
            .unwrap_or_default()
    }

    /// Look up one of the element's pads by name.
    pub fn pad(&self, name: &str) -> Result<PadId> {
        let reg = self.rt.graph.lock();
        let entry = reg.element(self.element)?;
        reg.find_pad(self.element, name).ok_or_else(|| Error::NoSuchPad {
            element: entry.name.clone(),
            pad: name.to_string(),
        })
    }

    /// The element's pads facing `direction`, in creation order.
    pub fn pads(&self, direction: PadDirection) -> Vec<PadId> {
        self.rt.graph.lock().pads_of(self.element, direction)
    }

    /// Whether the pad has a peer.
    pub fn is_linked(&self, pad: PadId) -> bool {
        self.rt
            .graph
            .lock()
            .pad(pad)
            .is_ok_and(|entry| entry.peer.is_some())
    }

    /// Send an item out of a source pad.
    ///
    /// May suspend the element until the consumer has taken the previous
    /// item. Items pushed on an unlinked pad are dropped with a warning.
    pub fn push(&mut self, pad: PadId, item: impl Into<Item>) -> Result<()> {
        self.rt
            .graph
            .lock()
            .check_pad(pad, self.element, PadDirection::Src)?;
        rendezvous::push(self.rt, pad, item.into())?;
        self.transfers += 1;
        Ok(())
    }

    /// Receive an item on a sink pad.
    ///
    /// May suspend the element until the producer delivers. Returns `None`
    /// when nothing can arrive right now (unlinked pad, paused producer, or
    /// a direct producer with nothing to give).
    pub fn pull(&mut self, pad: PadId) -> Result<Option<Item>> {
        self.rt
            .graph
            .lock()
            .check_pad(pad, self.element, PadDirection::Sink)?;
        let item = rendezvous::pull(self.rt, pad)?;
        if item.is_some() {
            self.transfers += 1;
        }
        Ok(item)
    }

    /// Wait until one of the sink pads has an item and return that pad.
    ///
    /// A pad that is already ready wins, in list order. Otherwise the
    /// producers run until one of them delivers. Fails with
    /// [`Error::NotLinked`] if none of the pads has a peer.
    pub fn select(&mut self, pads: &[PadId]) -> Result<PadId> {
        {
            let reg = self.rt.graph.lock();
            for pad in pads {
                reg.check_pad(*pad, self.element, PadDirection::Sink)?;
            }
        }
        rendezvous::select(self.rt, self.element, pads)
    }

    /// Return to the controller and make `iterate` report an interruption.
    pub fn interrupt(&mut self) -> Result<()> {
        self.rt.request_interrupt();
        self.rt.yield_to_main()
    }

    /// Give control back to the controller if this element is its chain's
    /// entry. Returns whether it yielded.
    pub fn yield_now(&mut self) -> Result<bool> {
        let is_entry = {
            let reg = self.rt.graph.lock();
            let chain = reg.element(self.element)?.chain;
            chain
                .and_then(|c| reg.chains.get(&c))
                .is_some_and(|c| c.entry == Some(self.element))
        };
        if is_entry {
            self.rt.yield_to_main()?;
        }
        Ok(is_entry)
    }

    /// Send end-of-stream on every linked source pad and disable the
    /// element.
    pub fn set_eos(&mut self) -> Result<()> {
        let pads: Vec<PadId> = self
            .pads(PadDirection::Src)
            .into_iter()
            .filter(|pad| self.is_linked(*pad))
            .collect();
        for pad in pads {
            rendezvous::push(self.rt, pad, Item::eos())?;
        }

        let name = {
            let mut reg = self.rt.graph.lock();
            reg.set_enabled(self.element, false)?;
            let entry = reg.element_mut(self.element)?;
            entry.eos = true;
            entry.name.clone()
        };
        trace_eos(&self.rt.name, &name);
        Ok(())
    }

    /// Whether end-of-stream arrived on a sink pad.
    pub fn is_eos(&self, pad: PadId) -> bool {
        self.rt.graph.lock().pad(pad).is_ok_and(|entry| entry.eos)
    }

    /// Record that end-of-stream arrived on a sink pad.
    ///
    /// Push elements get this done for them. Loop elements call it when
    /// they pull an `Eos`.
    pub fn mark_eos(&mut self, pad: PadId) -> Result<()> {
        let mut reg = self.rt.graph.lock();
        reg.check_pad(pad, self.element, PadDirection::Sink)?;
        reg.pad_mut(pad)?.eos = true;
        Ok(())
    }

    /// Every linked sink pad has seen end-of-stream.
    pub fn inputs_finished(&self) -> bool {
        let reg = self.rt.graph.lock();
        reg.pads_of(self.element, PadDirection::Sink)
            .into_iter()
            .filter_map(|pad| reg.pad(pad).ok())
            .filter(|entry| entry.peer.is_some())
            .all(|entry| entry.eos)
    }
}

impl std::fmt::Debug for ElementContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementContext")
            .field("element", &self.element)
            .field("scheduler", &self.rt.id)
            .finish()
    }
}
