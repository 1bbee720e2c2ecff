//! `LockstepCoordinator` — buffers per-tick peer input, schedules local
//! input `INPUT_DELAY` ticks ahead, dispatches confirmed ticks in canonical
//! order, and raises a desync event when periodic hash checkpoints
//! disagree.

use tracing::{debug, warn};

use lockstep_sim::{Command, PlayerId, Tick, TickInput};

use crate::input_buffer::InputBuffer;

/// Ticks between a command being issued locally and the tick on which it
/// is executed; absorbs network jitter.
pub const INPUT_DELAY: u64 = 3;
/// Interval, in ticks, between hash checkpoints.
pub const HASH_CHECK_INTERVAL: u64 = 25;
/// Ticks of confirmed history retained in the input buffer.
pub const RETENTION: u64 = crate::input_buffer::RETENTION;

/// Events the coordinator raises as it runs. Passed in as an explicit sink
/// at construction rather than the coordinator holding a back-reference to
/// its owner, so the composition root (not the coordinator) owns the
/// wiring between coordinator, session, and simulator.
pub trait CoordinatorEvents {
    /// One or more peers have not yet provided input for the next tick.
    /// Fires once per uninterrupted stall interval.
    fn on_stall(&mut self, missing_peers: &[PlayerId]);
    /// The stall that was previously reported has cleared.
    fn on_stall_resolved(&mut self);
    /// `tick`'s merged, canonically ordered command list is ready to be
    /// applied by the simulator.
    fn on_tick_ready(&mut self, tick: Tick, commands: &[Command]);
    /// A peer's hash at `tick` disagreed with the local hash.
    fn on_desync(&mut self, tick: Tick, local_hash: u32, remote_hashes: &[(PlayerId, u32)]);
}

/// A no-op sink, useful for tests that only care about `try_advance`'s
/// return value and the buffer's own state.
#[derive(Debug, Default)]
pub struct NullEvents;

impl CoordinatorEvents for NullEvents {
    fn on_stall(&mut self, _missing_peers: &[PlayerId]) {}
    fn on_stall_resolved(&mut self) {}
    fn on_tick_ready(&mut self, _tick: Tick, _commands: &[Command]) {}
    fn on_desync(&mut self, _tick: Tick, _local_hash: u32, _remote_hashes: &[(PlayerId, u32)]) {}
}

/// A message targeting a specific tick that should be broadcast to every
/// peer. The coordinator does not own peer channels (those belong to the
/// `SessionOrchestrator`/`PeerChannel` layer); it only hands back what to
/// send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundInput {
    pub target_tick: Tick,
    pub input: TickInput,
}

/// Buffers per-tick commands from every peer in a match and dispatches
/// confirmed ticks in canonical order once every participant's input has
/// arrived.
pub struct LockstepCoordinator<E: CoordinatorEvents> {
    local_player_id: PlayerId,
    peer_ids: Vec<PlayerId>,
    input_buffer: InputBuffer,
    local_tick: Tick,
    confirmed_tick: Tick,
    stalling: bool,
    events: E,
}

impl<E: CoordinatorEvents> LockstepCoordinator<E> {
    /// `confirmed_tick` starts at 0 (tick 0 is implicitly already settled),
    /// but no local tick can target anything before `local_tick +
    /// INPUT_DELAY`, so ticks `1..INPUT_DELAY` would otherwise have no
    /// local entry to wait for. Bootstrap them as empty input from every
    /// participant so they dispatch trivially once play begins, matching
    /// the startup behaviour the lockstep ordering invariants assume.
    fn seed_bootstrap_ticks(&mut self) {
        for tick in 1..INPUT_DELAY {
            self.input_buffer
                .insert(tick, self.local_player_id, TickInput::new(vec![], None));
            for &peer in &self.peer_ids {
                self.input_buffer.insert(tick, peer, TickInput::new(vec![], None));
            }
        }
    }

    pub fn new(local_player_id: PlayerId, mut peer_ids: Vec<PlayerId>, events: E) -> Self {
        peer_ids.sort_unstable();
        let mut coordinator = Self {
            local_player_id,
            peer_ids,
            input_buffer: InputBuffer::new(),
            local_tick: 0,
            confirmed_tick: 0,
            stalling: false,
            events,
        };
        coordinator.seed_bootstrap_ticks();
        coordinator
    }

    pub fn confirmed_tick(&self) -> Tick {
        self.confirmed_tick
    }

    pub fn is_stalling(&self) -> bool {
        self.stalling
    }

    /// Schedule `commands` for execution at `local_tick + INPUT_DELAY`,
    /// optionally attaching the `SimulationHash` of the current world
    /// state when `local_tick` lands on a `HASH_CHECK_INTERVAL` boundary.
    ///
    /// Must be called for every local tick, including empty ones — a
    /// skipped call stalls every peer waiting on this peer's input forever.
    pub fn queue_local_input(
        &mut self,
        commands: Vec<Command>,
        current_world_hash: Option<u32>,
    ) -> OutboundInput {
        let target = self.local_tick + INPUT_DELAY;
        let hash = if self.local_tick % HASH_CHECK_INTERVAL == 0 {
            current_world_hash
        } else {
            None
        };

        let input = TickInput::new(commands, hash);
        self.input_buffer.insert(target, self.local_player_id, input.clone());
        self.local_tick += 1;

        OutboundInput {
            target_tick: target,
            input,
        }
    }

    /// Deposit a peer's `TickInput` for `tick` and, if a stall was
    /// pending, re-attempt dispatch.
    pub fn handle_peer_input(&mut self, peer_id: PlayerId, tick: Tick, input: TickInput) {
        if !self.peer_ids.contains(&peer_id) {
            warn!(peer_id, "dropping input from unrecognised peer");
            return;
        }
        self.input_buffer.insert(tick, peer_id, input);
        if self.stalling {
            self.try_advance();
        }
    }

    /// Attempt to dispatch `confirmed_tick + 1`. Returns `true` if a tick
    /// was dispatched.
    pub fn try_advance(&mut self) -> bool {
        let next = self.confirmed_tick + 1;
        let present = self.input_buffer.peers_present(next);

        let mut missing: Vec<PlayerId> = std::iter::once(self.local_player_id)
            .chain(self.peer_ids.iter().copied())
            .filter(|p| !present.contains(p))
            .collect();
        missing.sort_unstable();

        if !missing.is_empty() {
            if !self.stalling {
                self.stalling = true;
                debug!(tick = next, ?missing, "stalling on missing peer input");
                self.events.on_stall(&missing);
            }
            return false;
        }

        if self.stalling {
            self.stalling = false;
            self.events.on_stall_resolved();
        }

        let ordered = self.input_buffer.ordered_entries(next);
        let merged: Vec<Command> = ordered
            .iter()
            .flat_map(|(_, ti)| ti.commands.iter().cloned())
            .collect();

        self.check_desync(next, &ordered);

        self.events.on_tick_ready(next, &merged);
        self.confirmed_tick = next;
        self.input_buffer.reclaim_before(self.confirmed_tick);

        true
    }

    /// A hash is attached by `queue_local_input` when `local_tick %
    /// HASH_CHECK_INTERVAL == 0`, but that input lands on `target_tick =
    /// local_tick + INPUT_DELAY`; check the same congruence shifted by
    /// `INPUT_DELAY` rather than `tick % HASH_CHECK_INTERVAL == 0`, which a
    /// target tick can never satisfy.
    fn check_desync(&mut self, tick: Tick, ordered: &[(PlayerId, &TickInput)]) {
        match tick.checked_sub(INPUT_DELAY) {
            Some(offset) if offset % HASH_CHECK_INTERVAL == 0 => {}
            _ => return,
        }
        let Some(local_hash) = ordered
            .iter()
            .find(|(p, _)| *p == self.local_player_id)
            .and_then(|(_, ti)| ti.hash)
        else {
            return;
        };

        let mismatches: Vec<(PlayerId, u32)> = ordered
            .iter()
            .filter(|(p, _)| *p != self.local_player_id)
            .filter_map(|(p, ti)| ti.hash.map(|h| (*p, h)))
            .filter(|(_, h)| *h != local_hash)
            .collect();

        if !mismatches.is_empty() {
            warn!(tick, local_hash, ?mismatches, "simulation hash mismatch");
            self.events.on_desync(tick, local_hash, &mismatches);
        }
    }

    /// Drop all state, as for starting a new game.
    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.local_tick = 0;
        self.confirmed_tick = 0;
        self.stalling = false;
        self.seed_bootstrap_ticks();
    }
}
