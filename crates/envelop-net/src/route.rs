//! The route table: static next-hop entries with XOR-nearest fallback.
//!
//! Two layers. The static map records explicit knowledge ("dest is
//! directly reachable", "dest goes via this relay"); the Kademlia view
//! answers when the static map has nothing, by handing back the known
//! peer closest to the destination.

use crate::kademlia::KademliaTable;
use envelop_core::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Hybrid next-hop table shared between the router and the host wiring.
#[derive(Default)]
pub struct RouteTable {
    /// Static routes: dest -> via.
    direct: RwLock<HashMap<PeerId, PeerId>>,
    /// Proximity fallback, present once `bind_self` ran.
    kad: RwLock<Option<KademliaTable>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor the Kademlia view on this node's own ID. Must run before
    /// the fallback can answer; learning before that only fills the
    /// static layer.
    pub fn bind_self(&self, self_id: PeerId) {
        let mut kad = self.kad.write();
        if kad.is_none() {
            *kad = Some(KademliaTable::new(self_id));
        }
    }

    /// Record that `id` is directly reachable. Ignores the zero ID.
    pub fn learn_direct(&self, id: PeerId) {
        if id.is_zero() {
            return;
        }
        self.direct.write().insert(id, id);
        if let Some(kad) = self.kad.write().as_mut() {
            kad.update(id);
        }
    }

    /// Record that `dest` is reached via the relay `via`. Ignores zero
    /// IDs on either side.
    pub fn learn_via(&self, dest: PeerId, via: PeerId) {
        if dest.is_zero() || via.is_zero() {
            return;
        }
        self.direct.write().insert(dest, via);
        if let Some(kad) = self.kad.write().as_mut() {
            kad.update(via);
        }
    }

    /// Next hop for `dest`: the static entry if present, else the closest
    /// known peer by XOR distance, else nothing.
    pub fn lookup(&self, dest: PeerId) -> Option<PeerId> {
        if let Some(via) = self.direct.read().get(&dest) {
            return Some(*via);
        }
        self.kad
            .read()
            .as_ref()
            .and_then(|kad| kad.find_closest(&dest, 1).first().copied())
    }
}
