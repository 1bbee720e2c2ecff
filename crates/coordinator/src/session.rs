//! `SessionOrchestrator` — lobby/session lifecycle and pairwise peer-channel
//! establishment through an external signalling relay.
//!
//! State machine: `disconnected → lobby → connecting → playing`, with
//! backward transitions on disconnect, leave, or connection timeout. The
//! orchestrator never blocks on the relay or on ICE exchange; actual SDP/ICE
//! generation is delegated to whatever WebRTC stack the embedder has (out of
//! scope here — see the crate's design notes), and is requested via
//! [`SessionAction`] rather than called directly, the same drain-a-command-
//! queue shape the pack's client-hosted multiplayer middleware uses for its
//! backend-to-transport boundary.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::warn;

use lockstep_wire::relay::{IceCandidateLine, LobbyDescriptor, PeerMessage, RelayMessage, SessionDescription};
use lockstep_wire::PlayerId;

use crate::peer_channel::ChannelStatus;

/// Budget for every expected peer channel to reach `connected` once
/// `game:start` arrives, before the session reverts to `lobby`.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);
/// Interval the embedder should retry the relay transport on while a local
/// name is still set; enforced by the caller, not this type, since the
/// socket itself lives outside this crate.
pub const RELAY_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
/// Maximum ICE candidates buffered per peer while waiting on that peer's
/// remote description; further candidates are dropped with a diagnostic.
pub const ICE_CANDIDATE_BUFFER_CAP: usize = 16;

/// Overridable knobs, mirroring the teacher's `ServerConfig`/
/// `ValidationConfig` pattern of a `Default` impl seeded from named
/// constants rather than scattering bare literals through the logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub connection_timeout: Duration,
    pub relay_reconnect_interval: Duration,
    pub ice_candidate_buffer_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: CONNECTION_TIMEOUT,
            relay_reconnect_interval: RELAY_RECONNECT_INTERVAL,
            ice_candidate_buffer_cap: ICE_CANDIDATE_BUFFER_CAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Lobby,
    Connecting,
    Playing,
}

/// Per-peer progress through offer/answer/ICE establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerEstablishment {
    Fresh,
    Offered,
    Answered,
    Connected,
    Failed,
}

/// Events the orchestrator raises, mirroring `CoordinatorEvents`'s
/// construction-time sink pattern.
pub trait SessionEvents {
    fn on_state_changed(&mut self, old: SessionState, new: SessionState);
    fn on_lobby_updated(&mut self, lobby: &LobbyDescriptor);
    fn on_peer_disconnected(&mut self, peer_id: PlayerId);
    fn on_all_peers_connected(&mut self, seed: u64, start_tick: u64);
    fn on_error(&mut self, message: &str);
}

#[derive(Debug, Default)]
pub struct NullSessionEvents;

impl SessionEvents for NullSessionEvents {
    fn on_state_changed(&mut self, _old: SessionState, _new: SessionState) {}
    fn on_lobby_updated(&mut self, _lobby: &LobbyDescriptor) {}
    fn on_peer_disconnected(&mut self, _peer_id: PlayerId) {}
    fn on_all_peers_connected(&mut self, _seed: u64, _start_tick: u64) {}
    fn on_error(&mut self, _message: &str) {}
}

/// Work the orchestrator has decided needs doing but cannot do itself,
/// handed back for the embedder to act on — analogous to draining a command
/// queue from a backend that cannot reach across the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send this message to the signalling relay.
    SendToRelay(PeerMessage),
    /// Create a local SDP offer for `peer_id` and report it back via
    /// [`SessionOrchestrator::offer_created`].
    CreateOfferFor(PlayerId),
    /// Create a local SDP answer for `peer_id` in response to `remote_sdp`
    /// and report it back via [`SessionOrchestrator::answer_created`].
    CreateAnswerFor { peer_id: PlayerId, remote_sdp: SessionDescription },
    /// Apply `sdp` as `peer_id`'s remote description (this side was the
    /// initiator and just received the answer).
    ApplyRemoteAnswer { peer_id: PlayerId, sdp: SessionDescription },
    /// Apply a remote ICE candidate to `peer_id`'s connection.
    ApplyIceCandidate { peer_id: PlayerId, candidate: IceCandidateLine },
    /// Connecting timed out, or the session otherwise reverted to `lobby`;
    /// tear down any in-progress peer connections.
    AbortConnecting,
}

/// Drives lobby membership and peer-channel establishment for one local
/// player. Does not own the relay socket or the `PeerChannel`s themselves —
/// only decides what should happen and reacts to what has.
pub struct SessionOrchestrator<E: SessionEvents> {
    local_player_id: PlayerId,
    local_name: Option<String>,
    state: SessionState,
    lobby: Option<LobbyDescriptor>,
    expected_peers: Vec<PlayerId>,
    peer_states: HashMap<PlayerId, PeerEstablishment>,
    remote_sdp_set: HashSet<PlayerId>,
    pending_ice: HashMap<PlayerId, Vec<IceCandidateLine>>,
    pending_match: Option<(u64, u64)>,
    connecting_since: Option<Instant>,
    config: SessionConfig,
    events: E,
}

impl<E: SessionEvents> SessionOrchestrator<E> {
    pub fn new(local_player_id: PlayerId, events: E) -> Self {
        Self::with_config(local_player_id, events, SessionConfig::default())
    }

    pub fn with_config(local_player_id: PlayerId, events: E, config: SessionConfig) -> Self {
        Self {
            local_player_id,
            local_name: None,
            state: SessionState::Disconnected,
            lobby: None,
            expected_peers: Vec::new(),
            peer_states: HashMap::new(),
            remote_sdp_set: HashSet::new(),
            pending_ice: HashMap::new(),
            pending_match: None,
            connecting_since: None,
            config,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn lobby(&self) -> Option<&LobbyDescriptor> {
        self.lobby.as_ref()
    }

    fn transition(&mut self, new: SessionState) {
        if new != self.state {
            let old = self.state;
            self.state = new;
            self.events.on_state_changed(old, new);
        }
    }

    /// Create-or-join `lobby_id` under `display_name`. Arms relay
    /// auto-reconnect: the name stays set until [`Self::disconnect`] clears
    /// it.
    pub fn join_lobby(&mut self, lobby_id: String, display_name: String) -> PeerMessage {
        self.local_name = Some(display_name.clone());
        self.transition(SessionState::Lobby);
        PeerMessage::JoinLobby { lobby_id, display_name }
    }

    pub fn leave_lobby(&mut self) -> PeerMessage {
        self.lobby = None;
        self.transition(SessionState::Disconnected);
        PeerMessage::LeaveLobby
    }

    pub fn ready_to_start(&self) -> PeerMessage {
        PeerMessage::ReadyToStart
    }

    /// Explicit disconnect: clears the remembered name so auto-reconnect
    /// does not fire, and drops all session state.
    pub fn disconnect(&mut self) {
        self.local_name = None;
        self.lobby = None;
        self.reset_peer_establishment();
        self.transition(SessionState::Disconnected);
    }

    /// Whether the embedder should keep retrying the relay transport (every
    /// [`RELAY_RECONNECT_INTERVAL`]) after losing the connection to it.
    pub fn wants_relay_reconnect(&self) -> bool {
        self.local_name.is_some()
    }

    /// Message to resend once the relay transport reconnects, re-seating
    /// this player in the lobby it was last in. `None` if no name is set
    /// (reconnect suppressed) or no lobby was ever joined.
    pub fn relay_reconnect_message(&self) -> Option<PeerMessage> {
        let name = self.local_name.clone()?;
        let lobby_id = self.lobby.as_ref()?.lobby_id.clone();
        Some(PeerMessage::JoinLobby { lobby_id, display_name: name })
    }

    fn reset_peer_establishment(&mut self) {
        self.expected_peers.clear();
        self.peer_states.clear();
        self.remote_sdp_set.clear();
        self.pending_ice.clear();
        self.pending_match = None;
        self.connecting_since = None;
    }

    /// Feed one inbound message from the relay. Returns the actions the
    /// embedder must carry out in response, in order.
    pub fn handle_relay_message(&mut self, message: RelayMessage) -> Vec<SessionAction> {
        match message {
            RelayMessage::LobbySnapshot(descriptor) => {
                if self.state == SessionState::Disconnected {
                    self.transition(SessionState::Lobby);
                }
                self.events.on_lobby_updated(&descriptor);
                self.lobby = Some(descriptor);
                Vec::new()
            }
            RelayMessage::StartMatch { seed, start_tick } => self.begin_connecting(seed, start_tick),
            RelayMessage::Offer { from, sdp } => self.handle_offer(from, sdp),
            RelayMessage::Answer { from, sdp } => self.handle_answer(from, sdp),
            RelayMessage::IceCandidate { from, candidate } => self.handle_ice_candidate(from, candidate),
            RelayMessage::Error { message } => {
                self.events.on_error(&message);
                Vec::new()
            }
        }
    }

    /// `game:start`: decide initiator roles for every lobby peer and start
    /// the connecting-state clock. Peers with a strictly greater id than
    /// the local one are ours to initiate; the rest we wait to hear an
    /// offer from.
    fn begin_connecting(&mut self, seed: u64, start_tick: u64) -> Vec<SessionAction> {
        let Some(lobby) = self.lobby.clone() else {
            warn!("game:start received with no lobby joined");
            return Vec::new();
        };
        self.reset_peer_establishment();
        self.expected_peers = lobby
            .players
            .iter()
            .map(|p| p.player)
            .filter(|&id| id != self.local_player_id)
            .collect();
        for &peer_id in &self.expected_peers {
            self.peer_states.insert(peer_id, PeerEstablishment::Fresh);
        }
        self.pending_match = Some((seed, start_tick));
        self.connecting_since = Some(Instant::now());
        self.transition(SessionState::Connecting);

        let local_id = self.local_player_id;
        self.expected_peers
            .clone()
            .into_iter()
            .filter(|&peer_id| peer_id > local_id)
            .map(|peer_id| {
                self.peer_states.insert(peer_id, PeerEstablishment::Offered);
                SessionAction::CreateOfferFor(peer_id)
            })
            .collect()
    }

    fn handle_offer(&mut self, from: PlayerId, sdp: SessionDescription) -> Vec<SessionAction> {
        if self.state != SessionState::Connecting {
            warn!(from, "offer received outside connecting state, dropping");
            return Vec::new();
        }
        self.peer_states.insert(from, PeerEstablishment::Answered);
        self.remote_sdp_set.insert(from);
        let mut actions = vec![SessionAction::CreateAnswerFor { peer_id: from, remote_sdp: sdp }];
        actions.extend(self.flush_ice(from));
        actions
    }

    fn handle_answer(&mut self, from: PlayerId, sdp: SessionDescription) -> Vec<SessionAction> {
        if self.state != SessionState::Connecting {
            warn!(from, "answer received outside connecting state, dropping");
            return Vec::new();
        }
        self.peer_states.insert(from, PeerEstablishment::Answered);
        self.remote_sdp_set.insert(from);
        let mut actions = vec![SessionAction::ApplyRemoteAnswer { peer_id: from, sdp }];
        actions.extend(self.flush_ice(from));
        actions
    }

    fn handle_ice_candidate(&mut self, from: PlayerId, candidate: IceCandidateLine) -> Vec<SessionAction> {
        if self.remote_sdp_set.contains(&from) {
            return vec![SessionAction::ApplyIceCandidate { peer_id: from, candidate }];
        }
        let buffered = self.pending_ice.entry(from).or_default();
        if buffered.len() >= self.config.ice_candidate_buffer_cap {
            warn!(
                from,
                cap = self.config.ice_candidate_buffer_cap,
                "ICE candidate buffer full for peer, dropping candidate"
            );
            return Vec::new();
        }
        buffered.push(candidate);
        Vec::new()
    }

    fn flush_ice(&mut self, peer_id: PlayerId) -> Vec<SessionAction> {
        self.pending_ice
            .remove(&peer_id)
            .unwrap_or_default()
            .into_iter()
            .map(|candidate| SessionAction::ApplyIceCandidate { peer_id, candidate })
            .collect()
    }

    /// Report that a local offer was created for `peer_id`; returns the
    /// relay message to carry it.
    pub fn offer_created(&self, peer_id: PlayerId, sdp: SessionDescription) -> PeerMessage {
        PeerMessage::Offer { to: peer_id, sdp }
    }

    /// Report that a local answer was created for `peer_id`; returns the
    /// relay message to carry it.
    pub fn answer_created(&self, peer_id: PlayerId, sdp: SessionDescription) -> PeerMessage {
        PeerMessage::Answer { to: peer_id, sdp }
    }

    /// Report that a local ICE candidate is ready to send for `peer_id`.
    pub fn ice_candidate_ready(&self, peer_id: PlayerId, candidate: IceCandidateLine) -> PeerMessage {
        PeerMessage::IceCandidate { to: peer_id, candidate }
    }

    /// A peer channel's status changed. Transitions to `playing` once every
    /// expected peer has reached `connected`; surfaces `peer_disconnected`
    /// if a channel drops while already `playing`.
    pub fn on_peer_channel_status(&mut self, peer_id: PlayerId, status: ChannelStatus) {
        match status {
            ChannelStatus::Connected => {
                self.peer_states.insert(peer_id, PeerEstablishment::Connected);
                if self.state == SessionState::Connecting && self.all_peers_connected() {
                    if let Some((seed, start_tick)) = self.pending_match.take() {
                        self.connecting_since = None;
                        self.transition(SessionState::Playing);
                        self.events.on_all_peers_connected(seed, start_tick);
                    }
                }
            }
            ChannelStatus::Disconnected | ChannelStatus::Failed => {
                self.peer_states.insert(peer_id, PeerEstablishment::Failed);
                if self.state == SessionState::Playing {
                    self.events.on_peer_disconnected(peer_id);
                }
            }
        }
    }

    fn all_peers_connected(&self) -> bool {
        !self.expected_peers.is_empty()
            && self
                .expected_peers
                .iter()
                .all(|id| self.peer_states.get(id) == Some(&PeerEstablishment::Connected))
    }

    /// Call periodically while `connecting`; reverts to `lobby` and returns
    /// [`SessionAction::AbortConnecting`] if the budget has elapsed.
    pub fn check_connection_timeout(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Connecting {
            return Vec::new();
        }
        let Some(since) = self.connecting_since else {
            return Vec::new();
        };
        if now.duration_since(since) < self.config.connection_timeout {
            return Vec::new();
        }
        self.reset_peer_establishment();
        self.transition(SessionState::Lobby);
        self.events
            .on_error("connection timeout: not every peer reached connected in time");
        vec![SessionAction::AbortConnecting]
    }
}
