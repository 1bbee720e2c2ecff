//! `PeerChannel` — the reliable, ordered, length-framed pipe between two
//! connected peers, plus an in-memory test double standing in for it.
//!
//! Establishing the channel (offer/answer/ICE) is [`crate::session`]'s job;
//! this module only covers the pipe that exists once that handshake
//! completes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use lockstep_wire::PlayerId;

/// Inbound frames larger than this are discarded on receipt, unexamined —
/// the transport is not trusted to validate payload shapes, the recipient
/// is.
pub const MAX_INBOUND_PAYLOAD_BYTES: usize = 64 * 1024;

/// Lifecycle status of one peer's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Failed,
}

/// Sink for inbound messages and status transitions on a [`PeerChannel`].
/// Supplied at construction rather than the channel holding a back-reference
/// to its owner, the same pattern [`crate::coordinator::CoordinatorEvents`]
/// uses.
pub trait PeerChannelEvents {
    fn on_message(&mut self, peer_id: PlayerId, payload: &[u8]);
    fn on_status(&mut self, peer_id: PlayerId, status: ChannelStatus);
}

/// Reliable, ordered, length-framed bidirectional pipe to one peer.
pub trait PeerChannel {
    /// Enqueue `payload` for delivery. Returns `false` without sending if
    /// the channel is closed or the payload exceeds the inbound cap on the
    /// remote end (the sender is expected to respect the same cap).
    fn send(&mut self, payload: &[u8]) -> bool;
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// A frame pending delivery between the two halves of an
/// [`InMemoryPeerChannel`] pair.
type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// In-process [`PeerChannel`] pairing two endpoints through shared queues.
/// Delivery is FIFO per direction, matching the reliable-ordered contract
/// without a real network underneath — useful for tests and for a
/// single-process harness of the coordinator against itself.
pub struct InMemoryPeerChannel {
    remote_id: PlayerId,
    outbound: Queue,
    inbound: Queue,
    open: bool,
}

impl InMemoryPeerChannel {
    /// Build a connected pair: `local`'s view of `remote`, and `remote`'s
    /// view of `local`.
    pub fn pair(local: PlayerId, remote: PlayerId) -> (Self, Self) {
        let local_to_remote = Rc::new(RefCell::new(VecDeque::new()));
        let remote_to_local = Rc::new(RefCell::new(VecDeque::new()));
        let a = Self {
            remote_id: remote,
            outbound: local_to_remote.clone(),
            inbound: remote_to_local.clone(),
            open: true,
        };
        let b = Self {
            remote_id: local,
            outbound: remote_to_local,
            inbound: local_to_remote,
            open: true,
        };
        (a, b)
    }

    pub fn remote_id(&self) -> PlayerId {
        self.remote_id
    }

    /// Drain every buffered inbound frame and dispatch it to `events`, in
    /// arrival order. Oversized frames were already dropped at `send` time
    /// on the sending end, but the cap is re-checked here too since the
    /// transport is not assumed trustworthy.
    pub fn poll<E: PeerChannelEvents>(&mut self, events: &mut E) {
        let mut inbound = self.inbound.borrow_mut();
        while let Some(payload) = inbound.pop_front() {
            if payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
                continue;
            }
            events.on_message(self.remote_id, &payload);
        }
    }
}

impl PeerChannel for InMemoryPeerChannel {
    fn send(&mut self, payload: &[u8]) -> bool {
        if !self.open || payload.is_empty() || payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
            return false;
        }
        self.outbound.borrow_mut().push_back(payload.to_vec());
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.outbound.borrow_mut().clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingEvents {
        messages: Vec<(PlayerId, Vec<u8>)>,
        statuses: Vec<(PlayerId, ChannelStatus)>,
    }

    impl PeerChannelEvents for RecordingEvents {
        fn on_message(&mut self, peer_id: PlayerId, payload: &[u8]) {
            self.messages.push((peer_id, payload.to_vec()));
        }
        fn on_status(&mut self, peer_id: PlayerId, status: ChannelStatus) {
            self.statuses.push((peer_id, status));
        }
    }

    #[test]
    fn sent_frames_arrive_in_order_on_the_other_end() {
        let (mut a, mut b) = InMemoryPeerChannel::pair(0, 1);
        assert!(a.send(b"first"));
        assert!(a.send(b"second"));

        let mut events = RecordingEvents::default();
        b.poll(&mut events);
        assert_eq!(
            events.messages,
            vec![(b.remote_id(), b"first".to_vec()), (b.remote_id(), b"second".to_vec())]
        );
    }

    #[test]
    fn oversized_frame_is_rejected_at_send() {
        let (mut a, _b) = InMemoryPeerChannel::pair(0, 1);
        let huge = vec![0u8; MAX_INBOUND_PAYLOAD_BYTES + 1];
        assert!(!a.send(&huge));
    }

    #[test]
    fn empty_frame_is_rejected_at_send() {
        let (mut a, _b) = InMemoryPeerChannel::pair(0, 1);
        assert!(!a.send(&[]));
    }

    #[test]
    fn closed_channel_refuses_to_send_and_drops_queued_frames() {
        let (mut a, mut b) = InMemoryPeerChannel::pair(0, 1);
        a.send(b"queued");
        a.close();
        assert!(!a.is_open());
        assert!(!a.send(b"after close"));

        let mut events = RecordingEvents::default();
        b.poll(&mut events);
        assert!(events.messages.is_empty());
    }
}
