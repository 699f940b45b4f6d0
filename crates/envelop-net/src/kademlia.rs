//! XOR-metric proximity view over known peers.
//!
//! 256 buckets, one per bit position; a peer lands in the bucket indexed
//! by the first bit where it differs from `self`. Buckets hold up to
//! [`K_BUCKET_SIZE`] entries with move-to-back LRU on touch and
//! evict-oldest on overflow (no liveness probe). This is the fallback
//! layer behind the static route table, not a full DHT: there are no
//! FIND_NODE RPCs.

use envelop_core::PeerId;

/// Maximum peers per bucket.
pub const K_BUCKET_SIZE: usize = 8;

const NUM_BUCKETS: usize = 256;

/// Index of the most significant differing bit between two IDs, scanning
/// big-endian. `None` when the IDs are equal.
pub fn bucket_index(a: &PeerId, b: &PeerId) -> Option<usize> {
    let x = a.xor_distance(b);
    for (i, byte) in x.iter().enumerate() {
        if *byte != 0 {
            return Some(i * 8 + byte.leading_zeros() as usize);
        }
    }
    None
}

/// A routing view anchored on one node's own ID. Plain data structure;
/// the owning route table provides the locking.
pub struct KademliaTable {
    self_id: PeerId,
    buckets: Vec<Vec<PeerId>>,
}

impl KademliaTable {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            buckets: vec![Vec::new(); NUM_BUCKETS],
        }
    }

    /// Learn (or refresh) a peer.
    ///
    /// Our own ID is never inserted. A known peer moves to the back of its
    /// bucket (most recently seen); a full bucket drops its oldest entry.
    pub fn update(&mut self, id: PeerId) {
        let Some(idx) = bucket_index(&self.self_id, &id) else {
            return; // id == self
        };
        let bucket = &mut self.buckets[idx];

        if let Some(pos) = bucket.iter().position(|p| *p == id) {
            bucket.remove(pos);
            bucket.push(id);
            return;
        }

        if bucket.len() >= K_BUCKET_SIZE {
            bucket.remove(0);
        }
        bucket.push(id);
    }

    /// The up-to-`n` known peers closest to `target` by XOR distance, in
    /// ascending-distance order.
    pub fn find_closest(&self, target: &PeerId, n: usize) -> Vec<PeerId> {
        let mut candidates: Vec<(PeerId, [u8; 32])> = self
            .buckets
            .iter()
            .flatten()
            .map(|id| (*id, id.xor_distance(target)))
            .collect();

        candidates.sort_by(|a, b| a.1.cmp(&b.1));
        candidates.truncate(n);
        candidates.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of peers currently in the view.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}
