//! Assigning capabilities, pad modes and cothreads to a chain.
//!
//! Wiring is planned under the registry lock, cothreads are created without
//! it, and the result is committed in one step. If any cothread cannot be
//! created the ones already made are dropped and the chain is left exactly
//! as it was.

use super::chain::ChainState;
use super::registry::{ChainId, ElementId, PadId, Registry};
use crate::cothread::Cothread;
use crate::element::{Capability, PadDirection, PadMode};
use crate::error::Result;
use tracing::debug;

pub(crate) struct WiringPlan {
    pub(crate) chain: ChainId,
    pub(crate) capabilities: Vec<(ElementId, Capability)>,
    pub(crate) modes: Vec<(PadId, PadMode)>,
    /// Members that still need a cothread, with the thread name to use.
    pub(crate) spawn: Vec<(ElementId, String)>,
}

impl Registry {
    pub(crate) fn plan_wiring(&self, chain: ChainId) -> Option<WiringPlan> {
        let members: Vec<ElementId> = self.chains.get(&chain)?.members().collect();
        let mut plan = WiringPlan {
            chain,
            capabilities: Vec::with_capacity(members.len()),
            modes: Vec::new(),
            spawn: Vec::new(),
        };

        for element in members {
            let Ok(entry) = self.element(element) else {
                continue;
            };
            let sink_pads = self.pads_of(element, PadDirection::Sink).len();
            let capability = Capability::classify(entry.has_loop, entry.is_decoupled(), sink_pads);
            plan.capabilities.push((element, capability));

            for pad in &entry.pads {
                let inside = self
                    .pads
                    .get(pad)
                    .and_then(|p| p.peer)
                    .and_then(|peer| self.pads.get(&peer))
                    .and_then(|peer| self.elements.get(&peer.element))
                    .is_some_and(|peer| peer.chain == Some(chain));
                let mode = if inside {
                    PadMode::Rendezvous
                } else {
                    PadMode::Direct
                };
                plan.modes.push((*pad, mode));
            }

            if entry.cothread.is_none() {
                plan.spawn.push((element, entry.name.clone()));
            }
        }
        Some(plan)
    }

    pub(crate) fn commit_wiring(&mut self, plan: WiringPlan, cothreads: Vec<(ElementId, Cothread)>) {
        for (element, capability) in plan.capabilities {
            if let Ok(entry) = self.element_mut(element) {
                entry.capability = Some(capability);
            }
        }
        for (pad, mode) in plan.modes {
            if let Ok(entry) = self.pad_mut(pad) {
                entry.mode = mode;
            }
        }
        for (element, cothread) in cothreads {
            if let Ok(entry) = self.element_mut(element) {
                entry.cothread = Some(cothread);
            }
        }

        let Some(chain) = self.chains.get(&plan.chain) else {
            return;
        };
        let num_cothreads = chain
            .members()
            .filter(|e| self.elements.get(e).is_some_and(|entry| entry.cothread.is_some()))
            .count();
        if let Some(chain) = self.chains.get_mut(&plan.chain) {
            chain.num_cothreads = num_cothreads;
            chain.state = ChainState::Wired;
            debug!(chain = %plan.chain, cothreads = num_cothreads, "chain wired");
        }
    }
}

/// Create the cothreads a plan asks for, all or nothing.
pub(crate) fn spawn_all<F>(plan: &WiringPlan, mut spawn: F) -> Result<Vec<(ElementId, Cothread)>>
where
    F: FnMut(ElementId, &str) -> Result<Cothread>,
{
    let mut created = Vec::with_capacity(plan.spawn.len());
    for (element, name) in &plan.spawn {
        // On error `created` is dropped, which destroys what was made so far.
        created.push((*element, spawn(*element, name)?));
    }
    Ok(created)
}
