//! Lockstep input coordination, session orchestration, and worker-offloaded
//! pathfinding for a peer-to-peer real-time strategy match.
//!
//! This crate sits between the wire protocol (`lockstep-wire`) and a
//! consuming simulator: [`coordinator::LockstepCoordinator`] buffers and
//! dispatches per-tick input, [`session::SessionOrchestrator`] drives lobby
//! membership and peer-channel establishment through a signalling relay,
//! and [`pathfinder::PathfinderWorker`] answers pathfinding requests off the
//! simulation thread so its progress rate cannot affect determinism.

#![deny(unsafe_code)]

pub mod coordinator;
pub mod input_buffer;
pub mod pathfinder;
pub mod peer_channel;
pub mod session;

pub use coordinator::{CoordinatorEvents, LockstepCoordinator, NullEvents, OutboundInput};
pub use pathfinder::{Grid, PathRequest, PathResult, PathfinderWorker, TerrainClass, TraversalClass};
pub use peer_channel::{ChannelStatus, InMemoryPeerChannel, PeerChannel, PeerChannelEvents};
pub use session::{NullSessionEvents, SessionAction, SessionEvents, SessionOrchestrator, SessionState};
