//! Per-tick input buffering for the [`crate::coordinator::LockstepCoordinator`].
//!
//! Keyed by `tick → (peer → TickInput)`. Unlike a client-facing input
//! buffer that has to arbitrate between several submissions for the same
//! tick (duplicate sends, out-of-order retries), peer `TickInput`s arrive
//! over a reliable, ordered channel exactly once per (tick, peer) — so this
//! buffer only needs to track presence and reclaim old entries, not
//! deduplicate or rate-limit.

use std::collections::HashMap;

use lockstep_sim::{PlayerId, Tick, TickInput};

/// `RETENTION` ticks of history kept behind `confirmed_tick` before an
/// entry becomes eligible for reclamation.
pub const RETENTION: u64 = 10;

/// A mapping `tick → (peer-id → TickInput)`.
#[derive(Debug, Default)]
pub struct InputBuffer {
    entries: HashMap<Tick, HashMap<PlayerId, TickInput>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Deposit one peer's input for one tick. Overwrites any prior entry
    /// for the same (tick, peer) pair — callers are expected to call this
    /// at most once per (tick, peer), per the "produced exactly once"
    /// contract on `TickInput`.
    pub fn insert(&mut self, tick: Tick, peer: PlayerId, input: TickInput) {
        self.entries.entry(tick).or_default().insert(peer, input);
    }

    /// All peers with an entry for `tick`.
    pub fn peers_present(&self, tick: Tick) -> Vec<PlayerId> {
        self.entries
            .get(&tick)
            .map(|peers| peers.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, tick: Tick, peer: PlayerId) -> Option<&TickInput> {
        self.entries.get(&tick)?.get(&peer)
    }

    /// Every peer present for `tick`, ordered by ascending peer-id — the
    /// canonical iteration order the coordinator merges commands in.
    pub fn ordered_entries(&self, tick: Tick) -> Vec<(PlayerId, &TickInput)> {
        let Some(peers) = self.entries.get(&tick) else {
            return Vec::new();
        };
        let mut ordered: Vec<_> = peers.iter().map(|(&p, ti)| (p, ti)).collect();
        ordered.sort_by_key(|(p, _)| *p);
        ordered
    }

    /// Drop every tick strictly older than `confirmed_tick.saturating_sub(RETENTION)`.
    pub fn reclaim_before(&mut self, confirmed_tick: Tick) {
        let floor = confirmed_tick.saturating_sub(RETENTION);
        self.entries.retain(|&tick, _| tick >= floor);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn tick_count(&self) -> usize {
        self.entries.len()
    }
}
