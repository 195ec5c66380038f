//! The shared registry of elements, pads and chains.
//!
//! Every object is addressed by an id that is never reused, so a stale id
//! fails lookup instead of reaching a different object. Peer references
//! between pads are ids as well; ownership of elements stays with the
//! registry and the scheduler only records membership.

use super::chain::{Chain, ChainState};
use crate::cothread::Cothread;
use crate::element::{Capability, Element, ElementFlags, PadDirection, PadMode, PadPresence};
use crate::error::{Error, Result};
use crate::item::Item;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Raw numeric id.
            pub fn as_u64(self) -> u64 {
                self.0
            }

            pub(crate) fn from_raw(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of an element in a [`Graph`].
    ElementId,
    "element"
);
define_id!(
    /// Identifier of a pad in a [`Graph`].
    PadId,
    "pad"
);
define_id!(
    /// Identifier of a chain.
    ChainId,
    "chain"
);
define_id!(
    /// Identifier of a scheduler sharing a [`Graph`].
    SchedulerId,
    "sched"
);

/// Shared handle to an element object.
pub(crate) type ElementHandle = Arc<Mutex<Box<dyn Element>>>;

pub(crate) struct ElementEntry {
    pub(crate) name: String,
    pub(crate) handle: ElementHandle,
    pub(crate) flags: ElementFlags,
    pub(crate) has_loop: bool,
    pub(crate) pads: SmallVec<[PadId; 4]>,
    pub(crate) scheduler: Option<SchedulerId>,
    pub(crate) chain: Option<ChainId>,
    pub(crate) capability: Option<Capability>,
    pub(crate) enabled: bool,
    pub(crate) eos: bool,
    pub(crate) cothread: Option<Cothread>,
    pub(crate) select_pad: Option<PadId>,
}

impl ElementEntry {
    pub(crate) fn is_decoupled(&self) -> bool {
        self.flags.contains(ElementFlags::DECOUPLED)
    }
}

pub(crate) struct PadEntry {
    pub(crate) name: String,
    pub(crate) direction: PadDirection,
    pub(crate) element: ElementId,
    pub(crate) peer: Option<PadId>,
    pub(crate) mode: PadMode,
    pub(crate) slot: Option<Item>,
    pub(crate) select_waiter: bool,
    pub(crate) eos: bool,
}

/// Where an item goes when it crosses a pad, resolved at the moment of use.
pub(crate) enum Route {
    /// No peer.
    Unlinked,
    /// Call the peer element synchronously.
    Direct {
        peer: PadId,
        element: ElementId,
        name: String,
        handle: ElementHandle,
        /// Peer belongs to another scheduler.
        foreign: bool,
        /// Peer is foreign and runs on a cothread of its own scheduler, which
        /// feeds its source pads itself.
        driven: bool,
        /// Peer treats end-of-stream as ordinary data.
        decoupled: bool,
    },
    /// Exchange through the slot on the sink side, switching to the peer.
    Rendezvous {
        peer: PadId,
        element: ElementId,
        cothread: crate::cothread::CothreadId,
        active: bool,
    },
}

/// Storage behind a [`Graph`].
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) elements: BTreeMap<ElementId, ElementEntry>,
    pub(crate) pads: BTreeMap<PadId, PadEntry>,
    pub(crate) chains: BTreeMap<ChainId, Chain>,
    next_id: u64,
}

impl Registry {
    pub(crate) fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn element(&self, id: ElementId) -> Result<&ElementEntry> {
        self.elements.get(&id).ok_or(Error::ElementNotFound(id))
    }

    pub(crate) fn element_mut(&mut self, id: ElementId) -> Result<&mut ElementEntry> {
        self.elements.get_mut(&id).ok_or(Error::ElementNotFound(id))
    }

    pub(crate) fn pad(&self, id: PadId) -> Result<&PadEntry> {
        self.pads.get(&id).ok_or(Error::PadNotFound(id))
    }

    pub(crate) fn pad_mut(&mut self, id: PadId) -> Result<&mut PadEntry> {
        self.pads.get_mut(&id).ok_or(Error::PadNotFound(id))
    }

    pub(crate) fn insert_element(&mut self, name: String, element: Box<dyn Element>) -> ElementId {
        let id = ElementId::from_raw(self.alloc_id());
        let templates = element.pad_templates();
        let flags = element.flags();
        let has_loop = element.has_loop();
        self.elements.insert(
            id,
            ElementEntry {
                name,
                handle: Arc::new(Mutex::new(element)),
                flags,
                has_loop,
                pads: SmallVec::new(),
                scheduler: None,
                chain: None,
                capability: None,
                enabled: false,
                eos: false,
                cothread: None,
                select_pad: None,
            },
        );
        for template in templates {
            if template.presence == PadPresence::Always {
                // Duplicate template names keep the first pad.
                let _ = self.insert_pad(id, template.name, template.direction);
            }
        }
        id
    }

    pub(crate) fn insert_pad(
        &mut self,
        element: ElementId,
        name: String,
        direction: PadDirection,
    ) -> Result<PadId> {
        let owner = self.element(element)?;
        if self.find_pad(element, &name).is_some() {
            return Err(Error::InvalidLink(format!(
                "element '{}' already has a pad named '{}'",
                owner.name, name
            )));
        }
        let id = PadId::from_raw(self.alloc_id());
        self.pads.insert(
            id,
            PadEntry {
                name,
                direction,
                element,
                peer: None,
                mode: PadMode::Direct,
                slot: None,
                select_waiter: false,
                eos: false,
            },
        );
        self.element_mut(element)?.pads.push(id);
        Ok(id)
    }

    pub(crate) fn find_pad(&self, element: ElementId, name: &str) -> Option<PadId> {
        let entry = self.elements.get(&element)?;
        entry
            .pads
            .iter()
            .copied()
            .find(|pad| self.pads.get(pad).is_some_and(|p| p.name == name))
    }

    pub(crate) fn pads_of(&self, element: ElementId, direction: PadDirection) -> Vec<PadId> {
        self.elements
            .get(&element)
            .map(|entry| {
                entry
                    .pads
                    .iter()
                    .copied()
                    .filter(|pad| self.pads.get(pad).is_some_and(|p| p.direction == direction))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pad must belong to `element` and face `direction`.
    pub(crate) fn check_pad(
        &self,
        pad: PadId,
        element: ElementId,
        direction: PadDirection,
    ) -> Result<&PadEntry> {
        let entry = self.pad(pad)?;
        if entry.element != element || entry.direction != direction {
            return Err(Error::InvalidState(format!(
                "{pad} is not a {direction:?} pad of {element}"
            )));
        }
        Ok(entry)
    }

    pub(crate) fn link(&mut self, src: PadId, sink: PadId) -> Result<()> {
        let src_entry = self.pad(src)?;
        let sink_entry = self.pad(sink)?;
        if src_entry.direction != PadDirection::Src || sink_entry.direction != PadDirection::Sink {
            return Err(Error::InvalidLink(format!(
                "{src} -> {sink}: expected a source pad linked to a sink pad"
            )));
        }
        if src_entry.peer == Some(sink) {
            return Ok(());
        }
        if src_entry.peer.is_some() || sink_entry.peer.is_some() {
            return Err(Error::InvalidLink(format!(
                "{src} -> {sink}: pad already linked"
            )));
        }
        self.pad_mut(src)?.peer = Some(sink);
        self.pad_mut(sink)?.peer = Some(src);
        Ok(())
    }

    pub(crate) fn unlink(&mut self, src: PadId, sink: PadId) -> Result<()> {
        if self.pad(src)?.peer != Some(sink) || self.pad(sink)?.peer != Some(src) {
            return Err(Error::NotLinked(src));
        }
        for pad in [src, sink] {
            let entry = self.pad_mut(pad)?;
            entry.peer = None;
            entry.mode = PadMode::Direct;
            entry.select_waiter = false;
        }
        Ok(())
    }

    /// Whether two elements may share a chain through a link between them.
    pub(crate) fn hop_eligible(&self, a: ElementId, b: ElementId) -> bool {
        match (self.elements.get(&a), self.elements.get(&b)) {
            (Some(a), Some(b)) => {
                a.scheduler.is_some()
                    && a.scheduler == b.scheduler
                    && !a.is_decoupled()
                    && !b.is_decoupled()
            }
            _ => false,
        }
    }

    /// Elements across links from `element`.
    pub(crate) fn neighbors(&self, element: ElementId) -> Vec<ElementId> {
        let Some(entry) = self.elements.get(&element) else {
            return Vec::new();
        };
        entry
            .pads
            .iter()
            .filter_map(|pad| self.pads.get(pad)?.peer)
            .filter_map(|peer| self.pads.get(&peer).map(|p| p.element))
            .collect()
    }

    pub(crate) fn route(&self, pad: PadId, scheduler: SchedulerId) -> Result<Route> {
        let entry = self.pad(pad)?;
        let Some(peer) = entry.peer else {
            return Ok(Route::Unlinked);
        };
        let peer_entry = self.pad(peer)?;
        let owner = self.element(entry.element)?;
        let peer_element = self.element(peer_entry.element)?;

        let same_chain = owner.chain.is_some() && owner.chain == peer_element.chain;
        if entry.mode == PadMode::Rendezvous
            && peer_entry.mode == PadMode::Rendezvous
            && same_chain
            && peer_element.scheduler == Some(scheduler)
        {
            if let Some(cothread) = &peer_element.cothread {
                return Ok(Route::Rendezvous {
                    peer,
                    element: peer_entry.element,
                    cothread: cothread.id(),
                    active: peer_element.enabled,
                });
            }
        }

        let foreign = matches!(peer_element.scheduler, Some(s) if s != scheduler);
        Ok(Route::Direct {
            peer,
            element: peer_entry.element,
            name: peer_element.name.clone(),
            handle: Arc::clone(&peer_element.handle),
            foreign,
            driven: foreign && peer_element.cothread.is_some(),
            decoupled: peer_element.is_decoupled(),
        })
    }

    pub(crate) fn set_enabled(&mut self, element: ElementId, enabled: bool) -> Result<()> {
        let entry = self.element_mut(element)?;
        entry.enabled = enabled;
        if enabled {
            entry.eos = false;
        }
        let chain = entry.chain;
        let pads = entry.pads.clone();
        if enabled {
            for pad in pads {
                self.pad_mut(pad)?.eos = false;
            }
        }
        if let Some(chain) = chain.and_then(|c| self.chains.get_mut(&c)) {
            chain.set_active(element, enabled);
        }
        Ok(())
    }

    /// Drop every item waiting in the element's slots.
    pub(crate) fn clear_queued(&mut self, element: ElementId) -> Result<usize> {
        let pads = self.element(element)?.pads.clone();
        let mut dropped = 0;
        for pad in pads {
            if self.pad_mut(pad)?.slot.take().is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(element = %self.element(element)?.name, dropped, "cleared queued items");
        }
        Ok(dropped)
    }

    pub(crate) fn remove_element(&mut self, element: ElementId) -> Result<()> {
        self.detach_element(element)?;
        let pads = self.element(element)?.pads.clone();
        for pad in &pads {
            let entry = self.pad(*pad)?;
            if let Some(peer) = entry.peer {
                let (src, sink) = match entry.direction {
                    PadDirection::Src => (*pad, peer),
                    PadDirection::Sink => (peer, *pad),
                };
                self.unlink(src, sink)?;
            }
        }
        for pad in pads {
            if let Some(entry) = self.pads.remove(&pad) {
                if entry.slot.is_some() {
                    warn!(pad = %entry.name, "dropping queued item of removed element");
                }
            }
        }
        if let Some(entry) = self.elements.remove(&element) {
            debug!(element = %entry.name, "element removed from graph");
        }
        Ok(())
    }

    pub(crate) fn chain_state(&self, chain: ChainId) -> Option<ChainState> {
        self.chains.get(&chain).map(|c| c.state)
    }
}

/// Shared registry of elements, pads and chains.
///
/// Cheap to clone. Any number of [`Scheduler`](super::Scheduler)s can be
/// created on one graph; each schedules the elements added to it.
#[derive(Clone, Default)]
pub struct Graph {
    inner: Arc<Mutex<Registry>>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an element and create its always-present pads.
    pub fn add_element(&self, name: impl Into<String>, element: impl Element + 'static) -> ElementId {
        self.add_boxed(name, Box::new(element))
    }

    /// Register an already boxed element.
    pub fn add_boxed(&self, name: impl Into<String>, element: Box<dyn Element>) -> ElementId {
        let name = name.into();
        let id = self.lock().insert_element(name.clone(), element);
        debug!(element = %name, id = %id, "element added to graph");
        id
    }

    /// Add a pad to an element (for request pads).
    pub fn add_pad(
        &self,
        element: ElementId,
        name: impl Into<String>,
        direction: PadDirection,
    ) -> Result<PadId> {
        let mut reg = self.lock();
        let pad = reg.insert_pad(element, name.into(), direction)?;
        // A new pad changes how the element is classified.
        if let Some(chain) = reg.element(element)?.chain {
            reg.mark_unwired(chain);
        }
        Ok(pad)
    }

    /// Detach an element from its scheduler, unlink its pads and drop it.
    pub fn remove_element(&self, element: ElementId) -> Result<()> {
        self.lock().remove_element(element)
    }

    /// Look up a pad by name.
    pub fn pad(&self, element: ElementId, name: &str) -> Result<PadId> {
        let reg = self.lock();
        let entry = reg.element(element)?;
        reg.find_pad(element, name).ok_or_else(|| Error::NoSuchPad {
            element: entry.name.clone(),
            pad: name.to_string(),
        })
    }

    /// All pads of an element in creation order.
    pub fn pads(&self, element: ElementId) -> Result<Vec<PadId>> {
        Ok(self.lock().element(element)?.pads.to_vec())
    }

    /// Name of an element.
    pub fn element_name(&self, element: ElementId) -> Result<String> {
        Ok(self.lock().element(element)?.name.clone())
    }

    /// Find an element by name.
    pub fn element_by_name(&self, name: &str) -> Option<ElementId> {
        self.lock()
            .elements
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    /// Name of a pad.
    pub fn pad_name(&self, pad: PadId) -> Result<String> {
        Ok(self.lock().pad(pad)?.name.clone())
    }

    /// Element owning a pad.
    pub fn pad_element(&self, pad: PadId) -> Result<ElementId> {
        Ok(self.lock().pad(pad)?.element)
    }

    /// Direction of a pad.
    pub fn pad_direction(&self, pad: PadId) -> Result<PadDirection> {
        Ok(self.lock().pad(pad)?.direction)
    }

    /// The pad linked to `pad`, if any.
    pub fn peer(&self, pad: PadId) -> Result<Option<PadId>> {
        Ok(self.lock().pad(pad)?.peer)
    }

    /// Transfer mode assigned to a pad by wiring.
    pub fn pad_mode(&self, pad: PadId) -> Result<PadMode> {
        Ok(self.lock().pad(pad)?.mode)
    }

    /// Whether an item is waiting in the pad's rendezvous slot.
    pub fn has_queued(&self, pad: PadId) -> Result<bool> {
        Ok(self.lock().pad(pad)?.slot.is_some())
    }

    /// Whether the element is enabled.
    pub fn is_enabled(&self, element: ElementId) -> Result<bool> {
        Ok(self.lock().element(element)?.enabled)
    }

    /// Whether the element reached end of stream.
    pub fn is_eos(&self, element: ElementId) -> Result<bool> {
        Ok(self.lock().element(element)?.eos)
    }

    /// Classification assigned when the element's chain was last wired.
    pub fn capability(&self, element: ElementId) -> Result<Option<Capability>> {
        Ok(self.lock().element(element)?.capability)
    }

    /// Whether the element currently has a cothread.
    pub fn has_cothread(&self, element: ElementId) -> Result<bool> {
        Ok(self.lock().element(element)?.cothread.is_some())
    }

    /// Scheduler the element belongs to.
    pub fn scheduler_of(&self, element: ElementId) -> Result<Option<SchedulerId>> {
        Ok(self.lock().element(element)?.scheduler)
    }

    /// Chain the element belongs to.
    pub fn chain_of(&self, element: ElementId) -> Result<Option<ChainId>> {
        Ok(self.lock().element(element)?.chain)
    }

    /// Run a closure against the element object.
    ///
    /// Must not be called while the element is running on a cothread.
    pub fn with_element<R>(
        &self,
        element: ElementId,
        f: impl FnOnce(&mut dyn Element) -> R,
    ) -> Result<R> {
        let handle = Arc::clone(&self.lock().element(element)?.handle);
        let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(guard.as_mut()))
    }

    pub(crate) fn alloc_scheduler_id(&self) -> SchedulerId {
        SchedulerId::from_raw(self.lock().alloc_id())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = self.lock();
        f.debug_struct("Graph")
            .field("elements", &reg.elements.len())
            .field("pads", &reg.pads.len())
            .field("chains", &reg.chains.len())
            .finish()
    }
}
