//! Lockstep Simulation Data Model
//!
//! This crate defines the wire-independent data model shared by every peer
//! in a lockstep match: the `Command` tagged union, the per-tick input
//! envelope, and `SimulationHash`, the canonical digest used for desync
//! detection.
//!
//! # Isolation
//!
//! Like the simulation core it sits next to, this crate performs no I/O,
//! reads no wall-clock time, and uses no ambient randomness. It is pure data
//! plus pure functions over that data. The authoritative game simulation
//! (entity movement, combat, economy) is an external collaborator — only the
//! shape of the state it exposes for hashing is specified here.

#![deny(unsafe_code)]

mod command;
mod hash;

pub use command::{Command, CommandKind};
pub use hash::{
    simulation_hash, EntitySnapshotForHash, PlayerCredits, WorldSnapshot,
    POSITION_QUANTISATION_FACTOR,
};

/// A single discrete simulation timestep; the atomic unit of lockstep time.
pub type Tick = u64;

/// Small integer identifying a match participant (0..7).
///
/// Callers MUST NOT assume peer ids are contiguous or zero-based beyond the
/// 0..=7 range the wire format reserves for them; they are used only as a
/// stable ordering/indexing key.
pub type PlayerId = u8;

/// Identifier for a simulation entity, stable for its lifetime.
pub type EntityId = u32;

/// One tick's worth of input from a single peer.
///
/// Produced exactly once per (tick, peer) and immutable after insertion into
/// an input buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct TickInput {
    pub commands: Vec<Command>,
    /// SimulationHash at this tick, attached every `HASH_CHECK_INTERVAL`
    /// ticks when world state is available.
    pub hash: Option<u32>,
}

impl TickInput {
    pub fn new(commands: Vec<Command>, hash: Option<u32>) -> Self {
        Self { commands, hash }
    }
}
