//! Relay signalling and lobby protocol.
//!
//! Unlike the per-tick input path, these messages are infrequent (one
//! handful per peer per match setup) and benefit from being human-readable
//! on the wire, so they are plain `serde`-tagged JSON rather than Protobuf.
//! A single externally-tagged enum per direction keeps the dispatch site a
//! `match` over a closed set of variants instead of a string-keyed lookup.
//!
//! This is a condensed protocol, not a literal one tag per wire message:
//! registration and lobby create/join collapse into one `JoinLobby` (the
//! relay can tell "new lobby" from "existing lobby" by whether `lobby_id`
//! already has an occupant), and lobby listing is out of scope because
//! `SessionOrchestrator` only ever needs the lobby it is already in, never
//! a directory of others.

use serde::{Deserialize, Serialize};

use crate::PlayerId;

/// Opaque SDP-like payload carried by offer/answer messages.
///
/// The relay never inspects this payload; it only forwards it between the
/// two peers named by `from`/`to`. Kept as a `String` rather than a parsed
/// SDP structure because the relay has no use for its contents.
pub type SessionDescription = String;

/// One ICE candidate line, forwarded verbatim between peers.
pub type IceCandidateLine = String;

/// A message a peer sends to the relay, to be forwarded to another peer or
/// acted on by the relay itself (lobby membership).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Request to create or join a named lobby.
    JoinLobby { lobby_id: String, display_name: String },
    /// Leave the lobby the sender currently occupies.
    LeaveLobby,
    /// WebRTC offer, relayed to `to` unmodified.
    Offer { to: PlayerId, sdp: SessionDescription },
    /// WebRTC answer, relayed to `to` unmodified.
    Answer { to: PlayerId, sdp: SessionDescription },
    /// ICE candidate, relayed to `to` unmodified.
    IceCandidate { to: PlayerId, candidate: IceCandidateLine },
    /// Mark the sender ready to start; the match begins once every seated
    /// player has sent this.
    ReadyToStart,
}

/// A message the relay sends to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Forwarded offer, naming the originating peer.
    Offer { from: PlayerId, sdp: SessionDescription },
    /// Forwarded answer, naming the originating peer.
    Answer { from: PlayerId, sdp: SessionDescription },
    /// Forwarded ICE candidate, naming the originating peer.
    IceCandidate { from: PlayerId, candidate: IceCandidateLine },
    /// Full lobby roster, sent on every membership change.
    LobbySnapshot(LobbyDescriptor),
    /// All seated players are ready; the match may start.
    StartMatch { seed: u64, start_tick: u64 },
    /// The request could not be satisfied.
    Error { message: String },
}

/// One player's entry in a lobby roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub player: PlayerId,
    pub display_name: String,
    pub ready: bool,
}

/// Snapshot of a lobby's membership, sent to every member on change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyDescriptor {
    pub lobby_id: String,
    pub players: Vec<LobbyPlayer>,
    /// Maximum seats; joins beyond this are rejected by the relay.
    pub max_players: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_message_tag_round_trips() {
        let msg = PeerMessage::Offer {
            to: 2,
            sdp: "v=0...".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"offer\""));
        let back: PeerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn relay_message_lobby_snapshot_round_trips() {
        let msg = RelayMessage::LobbySnapshot(LobbyDescriptor {
            lobby_id: "arena-1".into(),
            players: vec![LobbyPlayer {
                player: 0,
                display_name: "alice".into(),
                ready: true,
            }],
            max_players: 4,
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: RelayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn unknown_type_tag_fails_to_deserialize() {
        let json = r#"{"type":"not_a_real_variant"}"#;
        let result: Result<PeerMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
