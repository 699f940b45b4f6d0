//! The address registry: the overlay's address database.
//!
//! Forward map `PeerId -> [addr]` (the order is the dial fallback
//! priority) and reverse map `addr -> PeerId`. The reverse map exists
//! because an inbound QUIC stream only exposes a remote address; without
//! the reverse lookup a node can never attribute an envelope to the peer
//! that relayed it, and multi-hop route learning is impossible.

use envelop_core::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
struct Books {
    /// Forward: peer -> addresses, in dial priority order.
    addr_book: HashMap<PeerId, Vec<String>>,
    /// Reverse: address -> peer, last writer wins.
    rev_book: HashMap<String, PeerId>,
}

/// Bidirectional peer/address store shared by the node, the peer manager,
/// and the router wiring.
#[derive(Default)]
pub struct AddressRegistry {
    books: RwLock<Books>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a boot-time address for a peer (bootstrap/relay nodes with
    /// stable addresses). Deduplicates the forward list; overwrites the
    /// reverse entry.
    pub fn register_static(&self, id: PeerId, addr: &str) {
        self.register(id, addr);
        debug!(peer = %id, addr, "static peer registration");
    }

    /// Register a dynamically learned address (from a REGISTER envelope's
    /// observed source). NAT rebinds produce new addresses over time, so
    /// repeated registrations accumulate deduplicated entries.
    pub fn register_peer(&self, id: PeerId, addr: &str) {
        self.register(id, addr);
        debug!(peer = %id, addr, "dynamic peer registration");
    }

    fn register(&self, id: PeerId, addr: &str) {
        let mut books = self.books.write();
        let addrs = books.addr_book.entry(id).or_default();
        if !addrs.iter().any(|a| a == addr) {
            addrs.push(addr.to_string());
        }
        books.rev_book.insert(addr.to_string(), id);
    }

    /// All known addresses for a peer, in dial priority order. Returns a
    /// snapshot; callers never observe concurrent mutation.
    pub fn resolve(&self, id: PeerId) -> Vec<String> {
        self.books
            .read()
            .addr_book
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Reverse lookup: which peer last registered this address?
    pub fn peer_by_addr(&self, addr: &str) -> Option<PeerId> {
        self.books.read().rev_book.get(addr).copied()
    }
}
