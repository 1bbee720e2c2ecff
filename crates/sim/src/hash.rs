//! `SimulationHash` — the canonical per-tick state digest used by peers to
//! detect desync without exchanging full state.
//!
//! Ref: spec §4.2. The algorithm folds every hashed field into a single
//! `u32` via xor-rotate-multiply; float fields are canonicalised and
//! quantised first so that two bit-for-bit-different-but-numerically-equal
//! floats (signed zero, denormal drift, NaN payload bits) always hash
//! identically.

use crate::{EntityId, PlayerId};

/// Fixed-point scale applied to every positional float before hashing.
///
/// Part of the wire protocol: changing this value changes every hash a peer
/// on an older build would compute, so it is a constant, not a config knob.
pub const POSITION_QUANTISATION_FACTOR: f64 = 1000.0;

/// The minimal per-entity view `simulation_hash` needs. The authoritative
/// simulation owns the full entity representation; this is a projection of
/// it assembled fresh each time a hash is required.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshotForHash {
    pub entity_id: EntityId,
    pub owner: PlayerId,
    pub position: (f64, f64),
    pub health: f64,
    /// Opaque discriminator for entity type/unit kind; stable across a
    /// match but meaningless outside it.
    pub type_tag: u32,
}

/// Per-player economy state folded into the hash alongside entities, so
/// that a desync confined to credits (no entity involved) is still caught.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerCredits {
    pub player: PlayerId,
    pub credits: f64,
}

/// Everything `simulation_hash` needs from one tick of authoritative state.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub tick: crate::Tick,
    pub entities: Vec<EntitySnapshotForHash>,
}

/// Rotate-left by `amount` bits, folding a new 32-bit lane into `acc`.
///
/// The multiplier is an odd constant (odd so it's invertible mod 2^32,
/// which keeps the avalanche behaviour from collapsing) borrowed from the
/// well-known xorshift-multiply family rather than invented here.
fn fold(acc: u32, lane: u32) -> u32 {
    let mixed = acc ^ lane;
    mixed.rotate_left(13).wrapping_mul(0x85eb_ca6b)
}

/// Canonicalise an `f64` so that NaN, -0.0, and denormals hash the same as
/// their "normal" counterparts, then quantise and fold into two 32-bit
/// lanes (the integer and fractional halves of the fixed-point value).
fn hash_f64(acc: u32, value: f64) -> u32 {
    let canonical = if value.is_nan() {
        0.0
    } else if value == 0.0 {
        0.0 // collapses -0.0 into +0.0
    } else {
        value
    };
    let quantised = (canonical * POSITION_QUANTISATION_FACTOR).round() as i64;
    let acc = fold(acc, quantised as u32);
    fold(acc, (quantised >> 32) as u32)
}

fn hash_u32(acc: u32, value: u32) -> u32 {
    fold(acc, value)
}

/// Compute the canonical digest for one tick of world state.
///
/// Entities and credits are sorted by id internally before folding, so the
/// result does not depend on the iteration order the caller assembled them
/// in (callers are expected to already pass them in ascending-id order, but
/// this function does not trust that and re-sorts defensively).
pub fn simulation_hash(world: &WorldSnapshot, per_player_credits: &[PlayerCredits]) -> u32 {
    let mut entities: Vec<&EntitySnapshotForHash> = world.entities.iter().collect();
    entities.sort_by_key(|e| e.entity_id);

    let mut credits: Vec<&PlayerCredits> = per_player_credits.iter().collect();
    credits.sort_by_key(|c| c.player);

    let mut acc: u32 = 0x9e37_79b9; // golden-ratio seed, avoids an all-zero start state
    acc = hash_u32(acc, world.tick as u32);
    acc = hash_u32(acc, (world.tick >> 32) as u32);

    for entity in entities {
        acc = hash_u32(acc, entity.entity_id);
        acc = hash_u32(acc, entity.owner as u32);
        acc = hash_f64(acc, entity.position.0);
        acc = hash_f64(acc, entity.position.1);
        acc = hash_f64(acc, entity.health);
        acc = hash_u32(acc, entity.type_tag);
    }

    for player_credits in credits {
        acc = hash_u32(acc, player_credits.player as u32);
        acc = hash_f64(acc, player_credits.credits);
    }

    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tick: crate::Tick, entities: Vec<EntitySnapshotForHash>) -> WorldSnapshot {
        WorldSnapshot { tick, entities }
    }

    fn entity(id: EntityId, x: f64, y: f64) -> EntitySnapshotForHash {
        EntitySnapshotForHash {
            entity_id: id,
            owner: 1,
            position: (x, y),
            health: 100.0,
            type_tag: 7,
        }
    }

    #[test]
    fn identical_state_hashes_identically() {
        let a = snapshot(10, vec![entity(1, 1.5, 2.5), entity(2, -3.0, 4.0)]);
        let b = a.clone();
        let credits = [PlayerCredits { player: 1, credits: 500.0 }];
        assert_eq!(simulation_hash(&a, &credits), simulation_hash(&b, &credits));
    }

    #[test]
    fn entity_order_does_not_affect_hash() {
        let ascending = snapshot(10, vec![entity(1, 1.5, 2.5), entity(2, -3.0, 4.0)]);
        let descending = snapshot(10, vec![entity(2, -3.0, 4.0), entity(1, 1.5, 2.5)]);
        let credits = [PlayerCredits { player: 1, credits: 500.0 }];
        assert_eq!(
            simulation_hash(&ascending, &credits),
            simulation_hash(&descending, &credits)
        );
    }

    #[test]
    fn differing_position_changes_hash() {
        let a = snapshot(10, vec![entity(1, 1.5, 2.5)]);
        let b = snapshot(10, vec![entity(1, 1.50001, 2.5)]);
        let credits: [PlayerCredits; 0] = [];
        assert_ne!(simulation_hash(&a, &credits), simulation_hash(&b, &credits));
    }

    #[test]
    fn negative_zero_and_positive_zero_hash_identically() {
        let a = snapshot(10, vec![entity(1, 0.0, 0.0)]);
        let b = snapshot(10, vec![entity(1, -0.0, -0.0)]);
        let credits: [PlayerCredits; 0] = [];
        assert_eq!(simulation_hash(&a, &credits), simulation_hash(&b, &credits));
    }

    #[test]
    fn nan_health_does_not_panic_and_is_stable() {
        let mut e = entity(1, 0.0, 0.0);
        e.health = f64::NAN;
        let a = snapshot(10, vec![e.clone()]);
        let b = snapshot(10, vec![e]);
        let credits: [PlayerCredits; 0] = [];
        assert_eq!(simulation_hash(&a, &credits), simulation_hash(&b, &credits));
    }

    #[test]
    fn credits_are_folded_into_the_digest() {
        let world = snapshot(10, vec![entity(1, 0.0, 0.0)]);
        let low = [PlayerCredits { player: 1, credits: 100.0 }];
        let high = [PlayerCredits { player: 1, credits: 900.0 }];
        assert_ne!(simulation_hash(&world, &low), simulation_hash(&world, &high));
    }
}
