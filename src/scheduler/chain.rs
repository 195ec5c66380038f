//! Chains: maximal groups of linked elements driven by one scheduler.
//!
//! Two elements share a chain when a link joins them, both belong to the
//! same scheduler and neither is decoupled. Connecting merges chains;
//! disconnecting or removing an element throws the affected chains away and
//! regroups their members by flood fill. The rebuild is linear in the size of
//! the affected chains.

use super::registry::{ChainId, ElementId, Registry, SchedulerId};
use crate::error::Result;
use tracing::debug;

/// Wiring state of a chain.
///
/// A chain with no members is destroyed, so the empty state is never
/// observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainState {
    /// Membership changed since the last wiring; pad modes and cothreads
    /// are stale.
    Unwired,
    /// Every member is classified, has a cothread and its pads have modes.
    Wired,
}

pub(crate) struct Chain {
    pub(crate) id: ChainId,
    pub(crate) scheduler: SchedulerId,
    pub(crate) active: Vec<ElementId>,
    pub(crate) disabled: Vec<ElementId>,
    pub(crate) entry: Option<ElementId>,
    pub(crate) num_cothreads: usize,
    pub(crate) state: ChainState,
}

impl Chain {
    fn new(id: ChainId, scheduler: SchedulerId) -> Self {
        Self {
            id,
            scheduler,
            active: Vec::new(),
            disabled: Vec::new(),
            entry: None,
            num_cothreads: 0,
            state: ChainState::Unwired,
        }
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.active.iter().chain(self.disabled.iter()).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len() + self.disabled.len()
    }

    fn insert(&mut self, element: ElementId, enabled: bool) {
        if enabled {
            self.active.push(element);
        } else {
            self.disabled.push(element);
        }
    }

    fn remove(&mut self, element: ElementId) {
        self.active.retain(|e| *e != element);
        self.disabled.retain(|e| *e != element);
        if self.entry == Some(element) {
            self.entry = None;
        }
    }

    /// Move a member between the active and disabled lists.
    pub(crate) fn set_active(&mut self, element: ElementId, active: bool) {
        let (from, to) = if active {
            (&mut self.disabled, &mut self.active)
        } else {
            (&mut self.active, &mut self.disabled)
        };
        if let Some(pos) = from.iter().position(|e| *e == element) {
            from.remove(pos);
            to.push(element);
        }
    }
}

/// Snapshot of a chain for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    /// Chain id.
    pub id: ChainId,
    /// Wiring state.
    pub state: ChainState,
    /// Enabled members, in entry-selection order.
    pub active: Vec<ElementId>,
    /// Disabled members.
    pub disabled: Vec<ElementId>,
    /// Entry chosen by the last sweep.
    pub entry: Option<ElementId>,
    /// Cothreads assigned by the last wiring.
    pub cothreads: usize,
}

impl ChainInfo {
    /// Whether the element is a member.
    pub fn contains(&self, element: ElementId) -> bool {
        self.active.contains(&element) || self.disabled.contains(&element)
    }

    /// All members, enabled first.
    pub fn elements(&self) -> Vec<ElementId> {
        self.active.iter().chain(&self.disabled).copied().collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.active.len() + self.disabled.len()
    }

    /// Whether the chain has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry {
    pub(crate) fn create_chain(&mut self, scheduler: SchedulerId) -> ChainId {
        let id = ChainId::from_raw(self.alloc_id());
        self.chains.insert(id, Chain::new(id, scheduler));
        debug!(chain = %id, scheduler = %scheduler, "chain created");
        id
    }

    /// Destroy a chain; returns its former members.
    pub(crate) fn destroy_chain(&mut self, chain: ChainId) -> Vec<ElementId> {
        let Some(removed) = self.chains.remove(&chain) else {
            return Vec::new();
        };
        let members: Vec<_> = removed.members().collect();
        for element in &members {
            if let Some(entry) = self.elements.get_mut(element) {
                if entry.chain == Some(chain) {
                    entry.chain = None;
                }
            }
        }
        debug!(chain = %chain, members = members.len(), "chain destroyed");
        members
    }

    pub(crate) fn mark_unwired(&mut self, chain: ChainId) {
        if let Some(chain) = self.chains.get_mut(&chain) {
            chain.state = ChainState::Unwired;
        }
    }

    pub(crate) fn chain_add_element(&mut self, chain: ChainId, element: ElementId) -> Result<()> {
        let entry = self.element_mut(element)?;
        entry.chain = Some(chain);
        let enabled = entry.enabled;
        if let Some(c) = self.chains.get_mut(&chain) {
            c.insert(element, enabled);
            c.state = ChainState::Unwired;
        }
        Ok(())
    }

    /// Remove a member; the chain is destroyed once empty.
    pub(crate) fn chain_remove_element(&mut self, chain: ChainId, element: ElementId) -> Result<()> {
        self.element_mut(element)?.chain = None;
        let empty = match self.chains.get_mut(&chain) {
            Some(c) => {
                c.remove(element);
                c.state = ChainState::Unwired;
                c.len() == 0
            }
            None => false,
        };
        if empty {
            self.destroy_chain(chain);
        }
        Ok(())
    }

    /// Fold `absorbed` into `keep`. The absorbed chain no longer exists.
    pub(crate) fn merge_chains(&mut self, keep: ChainId, absorbed: ChainId) -> ChainId {
        if keep == absorbed {
            self.mark_unwired(keep);
            return keep;
        }
        let Some(other) = self.chains.remove(&absorbed) else {
            return keep;
        };
        for element in other.members() {
            if let Some(entry) = self.elements.get_mut(&element) {
                entry.chain = Some(keep);
            }
        }
        if let Some(chain) = self.chains.get_mut(&keep) {
            chain.active.extend(other.active);
            chain.disabled.extend(other.disabled);
            chain.state = ChainState::Unwired;
        }
        debug!(keep = %keep, absorbed = %absorbed, "chains merged");
        keep
    }

    /// Chains owned by a scheduler, in creation order.
    pub(crate) fn chains_of(&self, scheduler: SchedulerId) -> Vec<ChainId> {
        self.chains
            .values()
            .filter(|c| c.scheduler == scheduler)
            .map(|c| c.id)
            .collect()
    }

    pub(crate) fn chain_info(&self, chain: ChainId) -> Option<ChainInfo> {
        self.chains.get(&chain).map(|c| ChainInfo {
            id: c.id,
            state: c.state,
            active: c.active.clone(),
            disabled: c.disabled.clone(),
            entry: c.entry,
            cothreads: c.num_cothreads,
        })
    }

    /// Put an element under `scheduler` and merge it with its linked
    /// neighbors there.
    pub(crate) fn join_scheduler(&mut self, element: ElementId, scheduler: SchedulerId) -> Result<()> {
        let current = self.element(element)?.scheduler;
        if current == Some(scheduler) {
            return Ok(());
        }
        if current.is_some() {
            self.detach_element(element)?;
        }

        let entry = self.element_mut(element)?;
        entry.scheduler = Some(scheduler);
        if entry.is_decoupled() {
            debug!(element = %entry.name, "decoupled element, not placed in a chain");
            return Ok(());
        }

        let mut chain = self.create_chain(scheduler);
        self.chain_add_element(chain, element)?;
        for neighbor in self.neighbors(element) {
            if !self.hop_eligible(element, neighbor) {
                continue;
            }
            if let Some(other) = self.element(neighbor)?.chain {
                chain = self.merge_chains(chain, other);
            }
        }
        Ok(())
    }

    /// Take an element out of its scheduler, destroying its cothread and
    /// regrouping what is left of its chain.
    pub(crate) fn detach_element(&mut self, element: ElementId) -> Result<Option<SchedulerId>> {
        let entry = self.element_mut(element)?;
        let Some(scheduler) = entry.scheduler.take() else {
            return Ok(None);
        };
        let chain = entry.chain;
        entry.capability = None;
        entry.select_pad = None;
        let cothread = entry.cothread.take();
        drop(cothread);

        if let Some(chain) = chain {
            self.chain_remove_element(chain, element)?;
            if self.chains.contains_key(&chain) {
                let members = self.destroy_chain(chain);
                self.regroup(members);
            }
        }
        for pad in self.element(element)?.pads.clone() {
            self.pad_mut(pad)?.mode = crate::element::PadMode::Direct;
        }
        debug!(element = %self.element(element)?.name, scheduler = %scheduler, "element detached");
        Ok(Some(scheduler))
    }

    /// Chain bookkeeping for a new link between two elements that may share
    /// a chain.
    pub(crate) fn connect_chains(&mut self, a: ElementId, b: ElementId) -> Result<()> {
        let chain_a = self.element(a)?.chain;
        let chain_b = self.element(b)?.chain;
        match (chain_a, chain_b) {
            (None, None) => {
                let scheduler = self.element(a)?.scheduler;
                if let Some(scheduler) = scheduler {
                    let chain = self.create_chain(scheduler);
                    self.chain_add_element(chain, a)?;
                    self.chain_add_element(chain, b)?;
                }
            }
            (Some(chain), None) => self.chain_add_element(chain, b)?,
            (None, Some(chain)) => self.chain_add_element(chain, a)?,
            (Some(x), Some(y)) => {
                self.merge_chains(x, y);
            }
        }
        Ok(())
    }

    /// Throw away the chains of the given elements and rebuild them from
    /// reachability.
    pub(crate) fn split_chains(&mut self, endpoints: &[ElementId]) -> Result<()> {
        let mut members = Vec::new();
        for element in endpoints {
            if let Some(chain) = self.element(*element)?.chain {
                members.extend(self.destroy_chain(chain));
            }
        }
        // Endpoints first so each side is rebuilt from its former endpoint.
        let mut order: Vec<ElementId> = endpoints.to_vec();
        order.extend(members);
        self.regroup(order);
        Ok(())
    }

    /// Give every listed element without a chain the chain of everything
    /// reachable from it.
    fn regroup(&mut self, elements: Vec<ElementId>) {
        for element in elements {
            self.flood_fill(element);
        }
    }

    fn flood_fill(&mut self, start: ElementId) -> Option<ChainId> {
        let entry = self.elements.get(&start)?;
        if entry.chain.is_some() || entry.is_decoupled() {
            return None;
        }
        let scheduler = entry.scheduler?;

        let chain = self.create_chain(scheduler);
        let mut stack = vec![start];
        while let Some(element) = stack.pop() {
            let already = self.elements.get(&element).and_then(|e| e.chain);
            if already.is_some() {
                continue;
            }
            if self.chain_add_element(chain, element).is_err() {
                continue;
            }
            for neighbor in self.neighbors(element) {
                let unchained = self
                    .elements
                    .get(&neighbor)
                    .is_some_and(|e| e.chain.is_none());
                if unchained && self.hop_eligible(element, neighbor) {
                    stack.push(neighbor);
                }
            }
        }
        Some(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, PadTemplate};
    use crate::scheduler::Graph;

    struct Filter;

    impl Element for Filter {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![PadTemplate::sink("sink"), PadTemplate::src("src")]
        }
    }

    fn link(reg: &mut Registry, a: ElementId, b: ElementId) {
        let src = reg.find_pad(a, "src").unwrap();
        let sink = reg.find_pad(b, "sink").unwrap();
        reg.link(src, sink).unwrap();
    }

    #[test]
    fn test_join_merges_with_linked_neighbors() {
        let graph = Graph::new();
        let a = graph.add_element("a", Filter);
        let b = graph.add_element("b", Filter);
        let sched = graph.alloc_scheduler_id();
        let mut reg = graph.lock();
        link(&mut reg, a, b);

        reg.join_scheduler(a, sched).unwrap();
        let chain_a = reg.element(a).unwrap().chain.unwrap();
        reg.join_scheduler(b, sched).unwrap();

        let chain_b = reg.element(b).unwrap().chain.unwrap();
        assert_eq!(reg.element(a).unwrap().chain, Some(chain_b));
        assert_eq!(reg.chains_of(sched).len(), 1);
        // The fresh singleton chain of b absorbed a's chain.
        assert!(!reg.chains.contains_key(&chain_a));
    }

    #[test]
    fn test_merge_moves_members() {
        let graph = Graph::new();
        let a = graph.add_element("a", Filter);
        let b = graph.add_element("b", Filter);
        let sched = graph.alloc_scheduler_id();
        let mut reg = graph.lock();
        reg.join_scheduler(a, sched).unwrap();
        reg.join_scheduler(b, sched).unwrap();
        let x = reg.element(a).unwrap().chain.unwrap();
        let y = reg.element(b).unwrap().chain.unwrap();

        assert_eq!(reg.merge_chains(x, y), x);
        assert!(!reg.chains.contains_key(&y));
        assert_eq!(reg.element(b).unwrap().chain, Some(x));
        assert_eq!(reg.chains[&x].len(), 2);
    }

    #[test]
    fn test_split_rebuilds_two_sides() {
        let graph = Graph::new();
        let ids: Vec<_> = (0..4)
            .map(|i| graph.add_element(format!("e{i}"), Filter))
            .collect();
        let sched = graph.alloc_scheduler_id();
        let mut reg = graph.lock();
        for pair in ids.windows(2) {
            link(&mut reg, pair[0], pair[1]);
        }
        for id in &ids {
            reg.join_scheduler(*id, sched).unwrap();
        }
        assert_eq!(reg.chains_of(sched).len(), 1);

        let src = reg.find_pad(ids[1], "src").unwrap();
        let sink = reg.find_pad(ids[2], "sink").unwrap();
        reg.unlink(src, sink).unwrap();
        reg.split_chains(&[ids[1], ids[2]]).unwrap();

        let chains = reg.chains_of(sched);
        assert_eq!(chains.len(), 2);
        assert_eq!(reg.element(ids[0]).unwrap().chain, reg.element(ids[1]).unwrap().chain);
        assert_eq!(reg.element(ids[2]).unwrap().chain, reg.element(ids[3]).unwrap().chain);
        assert_ne!(reg.element(ids[0]).unwrap().chain, reg.element(ids[3]).unwrap().chain);
    }

    #[test]
    fn test_set_active_moves_between_lists() {
        let graph = Graph::new();
        let a = graph.add_element("a", Filter);
        let sched = graph.alloc_scheduler_id();
        let mut reg = graph.lock();
        reg.join_scheduler(a, sched).unwrap();
        let chain = reg.element(a).unwrap().chain.unwrap();
        assert_eq!(reg.chains[&chain].disabled, vec![a]);

        reg.set_enabled(a, true).unwrap();
        assert_eq!(reg.chains[&chain].active, vec![a]);
        assert!(reg.chains[&chain].disabled.is_empty());
    }

    #[test]
    fn test_removing_last_member_destroys_chain() {
        let graph = Graph::new();
        let a = graph.add_element("a", Filter);
        let sched = graph.alloc_scheduler_id();
        let mut reg = graph.lock();
        reg.join_scheduler(a, sched).unwrap();
        let chain = reg.element(a).unwrap().chain.unwrap();

        reg.detach_element(a).unwrap();
        assert!(!reg.chains.contains_key(&chain));
        assert_eq!(reg.element(a).unwrap().scheduler, None);
    }
}
