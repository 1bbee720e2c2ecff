//! The `Command` tagged union.
//!
//! Ref: spec §3 Data Model — "a tagged union identifying an action ... a
//! closed enumeration of ~26 opcodes".

use crate::{EntityId, PlayerId};

/// The closed set of action opcodes a `Command` may carry.
///
/// This enumeration is exhaustive by design: a new opcode is a protocol
/// version bump, not an open extension point (Design Note "Dynamic named
/// message dispatch" — no stringly-typed tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Move,
    AttackMove,
    Attack,
    Stop,
    HoldPosition,
    Patrol,
    Guard,
    BuildStart,
    BuildCancel,
    BuildPlace,
    ProduceUnit,
    ProduceUpgrade,
    CancelProduction,
    SetRallyPoint,
    Repair,
    Deploy,
    Undeploy,
    Sell,
    SelfDestruct,
    AbilityTargetedEntity,
    AbilityTargetedPosition,
    AbilityUntargeted,
    SetStance,
    GroupAssign,
    GroupSelect,
    Surrender,
}

impl CommandKind {
    /// All opcodes, in the stable wire order used by `CommandKind::from_u8`.
    pub const ALL: [CommandKind; 26] = [
        CommandKind::Move,
        CommandKind::AttackMove,
        CommandKind::Attack,
        CommandKind::Stop,
        CommandKind::HoldPosition,
        CommandKind::Patrol,
        CommandKind::Guard,
        CommandKind::BuildStart,
        CommandKind::BuildCancel,
        CommandKind::BuildPlace,
        CommandKind::ProduceUnit,
        CommandKind::ProduceUpgrade,
        CommandKind::CancelProduction,
        CommandKind::SetRallyPoint,
        CommandKind::Repair,
        CommandKind::Deploy,
        CommandKind::Undeploy,
        CommandKind::Sell,
        CommandKind::SelfDestruct,
        CommandKind::AbilityTargetedEntity,
        CommandKind::AbilityTargetedPosition,
        CommandKind::AbilityUntargeted,
        CommandKind::SetStance,
        CommandKind::GroupAssign,
        CommandKind::GroupSelect,
        CommandKind::Surrender,
    ];

    /// Stable wire-format opcode, 0-based, matching `Self::ALL`'s order.
    pub fn as_u8(self) -> u8 {
        Self::ALL.iter().position(|&k| k == self).expect("exhaustive") as u8
    }

    /// Recover a `CommandKind` from its wire opcode, if known.
    ///
    /// Unknown opcodes are a normal occurrence across protocol versions and
    /// are handled by the caller as "dropped during dispatch with a
    /// diagnostic" per spec §7, not as a panic.
    pub fn from_u8(opcode: u8) -> Option<Self> {
        Self::ALL.get(opcode as usize).copied()
    }
}

/// A single player action.
///
/// Invariant (spec §3): every command carries its issuing player; callers
/// that receive a `Command` from the network (the `LockstepCoordinator`) are
/// responsible for rejecting one whose `player` does not match the sending
/// peer — this type itself places no such restriction, since it is also
/// constructed locally for the issuing player's own input.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub player: PlayerId,
    pub entity_ids: Vec<EntityId>,
    /// Target world position, when the opcode is positional.
    pub target_position: Option<(f64, f64)>,
    pub target_entity_id: Option<EntityId>,
    /// Generic string argument (unit/ability identifier).
    pub arg_string: Option<String>,
    /// Generic numeric argument.
    pub arg_number: Option<f64>,
}

impl Command {
    /// Build a command with no optional fields set.
    pub fn new(kind: CommandKind, player: PlayerId, entity_ids: Vec<EntityId>) -> Self {
        Self {
            kind,
            player,
            entity_ids,
            target_position: None,
            target_entity_id: None,
            arg_string: None,
            arg_number: None,
        }
    }

    pub fn with_target_position(mut self, x: f64, z: f64) -> Self {
        self.target_position = Some((x, z));
        self
    }

    pub fn with_target_entity(mut self, entity_id: EntityId) -> Self {
        self.target_entity_id = Some(entity_id);
        self
    }

    pub fn with_arg_string(mut self, s: impl Into<String>) -> Self {
        self.arg_string = Some(s.into());
        self
    }

    pub fn with_arg_number(mut self, n: f64) -> Self {
        self.arg_number = Some(n);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_opcodes_round_trip_through_u8() {
        for kind in CommandKind::ALL {
            let opcode = kind.as_u8();
            assert_eq!(CommandKind::from_u8(opcode), Some(kind));
        }
    }

    #[test]
    fn opcode_count_is_twenty_six() {
        assert_eq!(CommandKind::ALL.len(), 26);
    }

    #[test]
    fn unknown_opcode_yields_none() {
        assert_eq!(CommandKind::from_u8(200), None);
    }

    #[test]
    fn builder_sets_optional_fields() {
        let cmd = Command::new(CommandKind::Move, 2, vec![10, 11])
            .with_target_position(3.5, -1.25)
            .with_arg_number(0.75);

        assert_eq!(cmd.player, 2);
        assert_eq!(cmd.entity_ids, vec![10, 11]);
        assert_eq!(cmd.target_position, Some((3.5, -1.25)));
        assert_eq!(cmd.arg_number, Some(0.75));
        assert!(cmd.target_entity_id.is_none());
    }
}
