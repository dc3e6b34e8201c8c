//! Lamport clock and write stamps.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a replica taking part in a board session.
pub type PeerId = u64;

/// Logical timestamp attached to every write.
///
/// Ordered by `counter`, then by `peer`, so two writes from different peers
/// never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub counter: u64,
    pub peer: PeerId,
}

/// Largest counter a replica accepts from the wire.
///
/// Kept within the range JSON numbers represent exactly, and far enough
/// below `u64::MAX` that local ticks never overflow.
pub const MAX_COUNTER: u64 = (1 << 53) - 1;

impl Stamp {
    pub const fn new(counter: u64, peer: PeerId) -> Self {
        Self { counter, peer }
    }

    /// Whether this stamp is one a well-behaved replica could have produced.
    pub fn is_valid(&self) -> bool {
        self.counter <= MAX_COUNTER
    }
}

/// Generate a random peer id.
pub fn random_peer_id() -> PeerId {
    Uuid::new_v4().as_u64_pair().0
}

/// Lamport clock for one replica.
#[derive(Debug, Clone)]
pub struct LamportClock {
    peer: PeerId,
    counter: u64,
}

impl LamportClock {
    pub fn new(peer: PeerId) -> Self {
        Self { peer, counter: 0 }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Highest counter seen so far.
    pub fn current(&self) -> u64 {
        self.counter
    }

    /// Advance the clock for a local write.
    pub fn tick(&mut self) -> Stamp {
        self.counter = self.counter.saturating_add(1);
        Stamp::new(self.counter, self.peer)
    }

    /// Account for a stamp received from another replica.
    ///
    /// Counters above [`MAX_COUNTER`] are ignored.
    pub fn observe(&mut self, stamp: Stamp) {
        if !stamp.is_valid() {
            return;
        }
        self.counter = self.counter.max(stamp.counter);
    }
}
