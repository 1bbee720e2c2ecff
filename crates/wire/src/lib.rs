//! Lockstep Wire Protocol Types
//!
//! This crate defines the on-wire representation exchanged between peers in
//! a lockstep match. Two distinct serialisations are deliberately in play:
//!
//! - **Binary, length-framed, high-frequency**: per-tick input envelopes and
//!   replay artifacts, via Protobuf-shaped messages generated with `prost`'s
//!   derive macro (no `.proto` file, no `build.rs`, matching how this
//!   workspace has always defined its wire types).
//! - **JSON, low-frequency, human-inspectable**: relay/signalling and lobby
//!   messages, via `serde`/`serde_json` tagged-union enums (see [`relay`]).
//!   These never appear on the hot per-tick path, so the ergonomics of a
//!   readable tagged union win over a binary encoding.
//!
//! Every peer in a match MUST depend on this crate; a version mismatch here
//! is a protocol break, not a soft-fail condition.

#![deny(unsafe_code)]

pub mod relay;

use prost::Message;

/// Tick type alias, matching the simulation crate.
pub type Tick = u64;

/// PlayerId type alias, matching the simulation crate.
pub type PlayerId = u8;

/// EntityId type alias, matching the simulation crate.
pub type EntityId = u32;

// ============================================================================
// Per-tick input envelope
// ============================================================================

/// Wire form of [`lockstep_sim::Command`].
#[derive(Clone, PartialEq, Message)]
pub struct CommandProto {
    /// `CommandKind` opcode, per `CommandKind::as_u8`/`from_u8`.
    #[prost(uint32, tag = "1")]
    pub kind: u32,

    #[prost(uint32, tag = "2")]
    pub player: u32,

    #[prost(uint32, repeated, tag = "3")]
    pub entity_ids: Vec<u32>,

    /// Empty, or exactly two elements (x, z).
    #[prost(double, repeated, tag = "4")]
    pub target_position: Vec<f64>,

    #[prost(uint32, optional, tag = "5")]
    pub target_entity_id: Option<u32>,

    #[prost(string, optional, tag = "6")]
    pub arg_string: Option<String>,

    #[prost(double, optional, tag = "7")]
    pub arg_number: Option<f64>,
}

/// Wire form of [`lockstep_sim::TickInput`].
#[derive(Clone, PartialEq, Message)]
pub struct TickInputProto {
    #[prost(uint64, tag = "1")]
    pub tick: Tick,

    #[prost(message, repeated, tag = "2")]
    pub commands: Vec<CommandProto>,

    #[prost(uint32, optional, tag = "3")]
    pub hash: Option<u32>,
}

/// Envelope exchanged on the peer data channel: one player's input for one
/// tick, already delayed by `INPUT_DELAY` at the sender.
#[derive(Clone, PartialEq, Message)]
pub struct LockstepInputMessage {
    #[prost(uint32, tag = "1")]
    pub player: u32,

    #[prost(message, optional, tag = "2")]
    pub input: Option<TickInputProto>,
}

// ============================================================================
// Replay artifact
// ============================================================================

/// One named opponent faction, per §6's `opponents:[{prefix,name}]`.
#[derive(Clone, PartialEq, Message)]
pub struct OpponentInfo {
    #[prost(string, tag = "1")]
    pub prefix: String,

    #[prost(string, tag = "2")]
    pub name: String,
}

/// Static, match-wide metadata recorded once at the head of a replay.
///
/// Field-for-field per spec §6's artifact header: `{version, date,
/// housePrefix, enemyPrefix, mapId, mapSeed, rngSeed, totalPlayers,
/// opponents, gameMode, difficulty?, gameSpeed?}`. `build_fingerprint` is a
/// supplemental addition (see DESIGN.md) carried over from the teacher's
/// replay crate; it is not part of §6's schema.
#[derive(Clone, PartialEq, Message)]
pub struct ReplayHeader {
    /// Schema version; starts at 1.
    #[prost(uint32, tag = "1")]
    pub version: u32,

    /// Recording date, caller-supplied (e.g. ISO-8601); this crate does not
    /// read wall-clock time itself (§4.1 isolation stance extends here).
    #[prost(string, tag = "2")]
    pub date: String,

    /// Local player's house/faction prefix.
    #[prost(string, tag = "3")]
    pub house_prefix: String,

    /// Primary opponent's house/faction prefix.
    #[prost(string, tag = "4")]
    pub enemy_prefix: String,

    #[prost(string, tag = "5")]
    pub map_id: String,

    #[prost(uint64, tag = "6")]
    pub map_seed: u64,

    /// Fixed RNG seed shared by every participant for the match.
    #[prost(uint64, tag = "7")]
    pub rng_seed: u64,

    #[prost(uint32, tag = "8")]
    pub total_players: u32,

    #[prost(message, repeated, tag = "9")]
    pub opponents: Vec<OpponentInfo>,

    #[prost(string, tag = "10")]
    pub game_mode: String,

    #[prost(string, optional, tag = "11")]
    pub difficulty: Option<String>,

    #[prost(double, optional, tag = "12")]
    pub game_speed: Option<f64>,

    /// Build fingerprint of the binary that recorded this replay.
    /// Supplemental (§3 SPEC_FULL "ambient" addition), not part of §6.
    #[prost(message, optional, tag = "13")]
    pub build_fingerprint: Option<BuildFingerprint>,
}

/// SHA-256 binary fingerprint plus traceability metadata, recorded so a
/// replay's provenance can be checked before trusting a verification run
/// against it.
#[derive(Clone, PartialEq, Message)]
pub struct BuildFingerprint {
    #[prost(string, tag = "1")]
    pub binary_sha256: String,

    #[prost(string, tag = "2")]
    pub target_triple: String,

    #[prost(string, tag = "3")]
    pub profile: String,
}

/// One recorded tick's worth of (already canonically merged) commands.
/// Recording is sparse: a tick with no commands is simply absent from the
/// artifact, not stored as an empty record (§3, §8 scenario 1).
#[derive(Clone, PartialEq, Message)]
pub struct TickCommands {
    #[prost(uint64, tag = "1")]
    pub tick: Tick,

    #[prost(message, repeated, tag = "2")]
    pub commands: Vec<CommandProto>,
}

/// A `SimulationHash` captured at a known tick, for replay verification.
#[derive(Clone, PartialEq, Message)]
pub struct HashCheckpoint {
    #[prost(uint64, tag = "1")]
    pub tick: Tick,

    #[prost(uint32, tag = "2")]
    pub hash: u32,
}

/// Complete recorded match, sufficient to deterministically re-simulate it
/// from tick 0 and verify the result against the embedded checkpoints.
#[derive(Clone, PartialEq, Message)]
pub struct ReplayArtifact {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ReplayHeader>,

    /// Sparse tick stream, strictly ascending by tick (§3, §4.3).
    #[prost(message, repeated, tag = "2")]
    pub ticks: Vec<TickCommands>,

    /// Hash checkpoints, ordered by tick ascending.
    #[prost(message, repeated, tag = "3")]
    pub checkpoints: Vec<HashCheckpoint>,

    /// Last tick simulated before the match concluded.
    #[prost(uint64, tag = "4")]
    pub end_tick: Tick,
}

// ============================================================================
// Conversions to/from the simulation data model
// ============================================================================

impl From<&lockstep_sim::Command> for CommandProto {
    fn from(c: &lockstep_sim::Command) -> Self {
        Self {
            kind: c.kind.as_u8() as u32,
            player: c.player as u32,
            entity_ids: c.entity_ids.clone(),
            target_position: match c.target_position {
                Some((x, z)) => vec![x, z],
                None => Vec::new(),
            },
            target_entity_id: c.target_entity_id,
            arg_string: c.arg_string.clone(),
            arg_number: c.arg_number,
        }
    }
}

/// Errors converting wire types back into simulation types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    UnknownCommandKind(u32),
    MalformedTargetPosition,
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommandKind(opcode) => {
                write!(f, "unknown command opcode {opcode}")
            }
            Self::MalformedTargetPosition => {
                write!(f, "target_position must have exactly 0 or 2 elements")
            }
        }
    }
}

impl std::error::Error for ConversionError {}

impl TryFrom<CommandProto> for lockstep_sim::Command {
    type Error = ConversionError;

    fn try_from(c: CommandProto) -> Result<Self, Self::Error> {
        let kind = lockstep_sim::CommandKind::from_u8(c.kind as u8)
            .ok_or(ConversionError::UnknownCommandKind(c.kind))?;
        let target_position = match c.target_position.as_slice() {
            [] => None,
            [x, z] => Some((*x, *z)),
            _ => return Err(ConversionError::MalformedTargetPosition),
        };
        Ok(Self {
            kind,
            player: c.player as lockstep_sim::PlayerId,
            entity_ids: c.entity_ids,
            target_position,
            target_entity_id: c.target_entity_id,
            arg_string: c.arg_string,
            arg_number: c.arg_number,
        })
    }
}

impl TickInputProto {
    /// Build the wire form of `ti` for `tick`. `TickInput` itself carries no
    /// tick (it is addressed by the map key everywhere it is buffered), so
    /// unlike `CommandProto`'s conversion this cannot be a blanket `From`
    /// impl without silently fabricating a tick — callers (e.g. the
    /// coordinator, which already tracks `OutboundInput::target_tick`) must
    /// supply the real one.
    pub fn from_tick_input(tick: Tick, ti: &lockstep_sim::TickInput) -> Self {
        Self {
            tick,
            commands: ti.commands.iter().map(CommandProto::from).collect(),
            hash: ti.hash,
        }
    }
}

impl TryFrom<TickInputProto> for lockstep_sim::TickInput {
    type Error = ConversionError;

    fn try_from(ti: TickInputProto) -> Result<Self, Self::Error> {
        let commands: Result<Vec<_>, _> = ti.commands.into_iter().map(TryInto::try_into).collect();
        Ok(Self::new(commands?, ti.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_sim::{Command, CommandKind, TickInput};

    #[test]
    fn command_roundtrips_through_proto() {
        let cmd = Command::new(CommandKind::AttackMove, 3, vec![7, 8])
            .with_target_position(12.0, -4.5)
            .with_arg_number(1.0);
        let proto = CommandProto::from(&cmd);
        let encoded = proto.encode_to_vec();
        let decoded = CommandProto::decode(encoded.as_slice()).unwrap();
        let back: Command = decoded.try_into().unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn unknown_opcode_is_rejected_on_decode() {
        let proto = CommandProto {
            kind: 255,
            player: 0,
            entity_ids: vec![],
            target_position: vec![],
            target_entity_id: None,
            arg_string: None,
            arg_number: None,
        };
        let result: Result<Command, _> = proto.try_into();
        assert_eq!(result, Err(ConversionError::UnknownCommandKind(255)));
    }

    #[test]
    fn malformed_target_position_is_rejected() {
        let proto = CommandProto {
            kind: 0,
            player: 0,
            entity_ids: vec![],
            target_position: vec![1.0],
            target_entity_id: None,
            arg_string: None,
            arg_number: None,
        };
        let result: Result<Command, _> = proto.try_into();
        assert_eq!(result, Err(ConversionError::MalformedTargetPosition));
    }

    #[test]
    fn tick_input_roundtrips_through_proto() {
        let ti = TickInput::new(
            vec![Command::new(CommandKind::Stop, 1, vec![1])],
            Some(0xabcd1234),
        );
        let proto = TickInputProto::from_tick_input(42, &ti);
        let encoded = proto.encode_to_vec();
        let decoded = TickInputProto::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded.tick, 42);
        let back: TickInput = decoded.try_into().unwrap();
        assert_eq!(ti, back);
    }

    #[test]
    fn replay_artifact_roundtrips() {
        let artifact = ReplayArtifact {
            header: Some(ReplayHeader {
                version: 1,
                date: "2026-07-27".into(),
                house_prefix: "ATR".into(),
                enemy_prefix: "HAR".into(),
                map_id: "dune-arena-02".into(),
                map_seed: 7,
                rng_seed: 12345,
                total_players: 2,
                opponents: vec![OpponentInfo {
                    prefix: "HAR".into(),
                    name: "Harkonnen AI".into(),
                }],
                game_mode: "skirmish".into(),
                difficulty: Some("hard".into()),
                game_speed: Some(1.0),
                build_fingerprint: Some(BuildFingerprint {
                    binary_sha256: "abc123".into(),
                    target_triple: "x86_64-unknown-linux-gnu".into(),
                    profile: "release".into(),
                }),
            }),
            ticks: vec![TickCommands {
                tick: 10,
                commands: vec![],
            }],
            checkpoints: vec![HashCheckpoint { tick: 25, hash: 42 }],
            end_tick: 3600,
        };
        let encoded = artifact.encode_to_vec();
        let decoded = ReplayArtifact::decode(encoded.as_slice()).unwrap();
        assert_eq!(artifact, decoded);
    }
}
