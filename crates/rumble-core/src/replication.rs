//! Authority flags and the replication gate.
//!
//! Exactly one peer is authoritative for each networked object: it samples
//! input, runs the motor, and requests state transitions. State-changing
//! events are never applied unilaterally: the authoritative peer issues a
//! remote call through the gate and every peer (itself included) executes it
//! identically when it drains its inbox.
//!
//! The transport is abstract; tests and local sessions use the in-process
//! [`LoopbackHub`]. A real deployment plugs a network transport in here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use rumble_proto::{ActorId, CarryableId, PeerId, RemoteCall, TransformSample, WireMessage};

/// Per-object authority flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
    pub owner: PeerId,
}

impl Authority {
    pub fn new(owner: PeerId) -> Self {
        Self { owner }
    }

    /// True on the peer that simulates this object.
    pub fn is_mine(&self, local_peer: PeerId) -> bool {
        self.owner == local_peer
    }
}

/// How the local peer left the match, when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// The transport dropped; remote copies freeze at last-known state.
    Disconnected,
}

impl ConnectionStatus {
    /// Player-facing status line. Raw causes stay in the logs.
    pub fn status_line(self) -> Option<&'static str> {
        match self {
            Self::Connected => None,
            Self::Disconnected => Some("Network error, please check your connection"),
        }
    }
}

/// Byte transport between peers. Broadcasts reach every peer, including the
/// sender; per-sender ordering is preserved.
pub trait Transport {
    fn broadcast(&mut self, data: Vec<u8>);
    /// Drains everything received since the last poll.
    fn poll(&mut self) -> Vec<Vec<u8>>;
    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct HubInner {
    inboxes: HashMap<PeerId, VecDeque<Vec<u8>>>,
}

/// In-process message hub connecting loopback transports. Single-threaded,
/// like the simulation itself.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer and returns its transport endpoint.
    pub fn endpoint(&self, peer: PeerId) -> LoopbackTransport {
        self.inner.borrow_mut().inboxes.entry(peer).or_default();
        LoopbackTransport {
            inner: Rc::clone(&self.inner),
            peer,
        }
    }
}

/// One peer's endpoint on the loopback hub.
pub struct LoopbackTransport {
    inner: Rc<RefCell<HubInner>>,
    peer: PeerId,
}

impl Transport for LoopbackTransport {
    fn broadcast(&mut self, data: Vec<u8>) {
        let mut inner = self.inner.borrow_mut();
        for inbox in inner.inboxes.values_mut() {
            inbox.push_back(data.clone());
        }
    }

    fn poll(&mut self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        inner
            .inboxes
            .get_mut(&self.peer)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

/// The replication gate: encodes outgoing calls and transform samples,
/// decodes the incoming stream.
pub struct ReplicationGate {
    transport: Box<dyn Transport>,
    pub local_peer: PeerId,
    status: ConnectionStatus,
}

impl ReplicationGate {
    pub fn new(transport: Box<dyn Transport>, local_peer: PeerId) -> Self {
        Self {
            transport,
            local_peer,
            status: ConnectionStatus::Connected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Issues a state-changing remote call to every peer, self included.
    pub fn issue(&mut self, call: RemoteCall) {
        tracing::debug!("[sync] issue {call:?}");
        self.send(&WireMessage::Call(call));
    }

    pub fn send_character_transform(&mut self, actor: ActorId, sample: TransformSample) {
        self.send(&WireMessage::CharacterTransform { actor, sample });
    }

    pub fn send_carryable_transform(&mut self, carryable: CarryableId, sample: TransformSample) {
        self.send(&WireMessage::CarryableTransform { carryable, sample });
    }

    fn send(&mut self, message: &WireMessage) {
        match message.to_bytes() {
            Ok(bytes) => self.transport.broadcast(bytes),
            Err(e) => tracing::error!("[sync] failed to encode message: {e}"),
        }
    }

    /// Drains and decodes the incoming stream. Malformed frames are dropped
    /// with a warning; they never poison the simulation.
    pub fn drain(&mut self) -> Vec<WireMessage> {
        if !self.transport.is_connected() && self.status == ConnectionStatus::Connected {
            self.status = ConnectionStatus::Disconnected;
            tracing::warn!(
                "[sync] transport lost: {}",
                self.status.status_line().unwrap_or_default()
            );
        }

        self.transport
            .poll()
            .into_iter()
            .filter_map(|bytes| match WireMessage::from_bytes(&bytes) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!("[sync] dropping malformed frame: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_is_exclusive() {
        let authority = Authority::new(2);
        assert!(authority.is_mine(2));
        assert!(!authority.is_mine(0));
    }

    #[test]
    fn test_broadcast_reaches_all_peers_including_sender() {
        let hub = LoopbackHub::new();
        let mut gate_a = ReplicationGate::new(Box::new(hub.endpoint(0)), 0);
        let mut gate_b = ReplicationGate::new(Box::new(hub.endpoint(1)), 1);

        gate_a.issue(RemoteCall::Pickup {
            carryable: 0,
            carrier: 1,
        });

        let on_a = gate_a.drain();
        let on_b = gate_b.drain();
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a, on_b);
    }

    #[test]
    fn test_per_sender_order_is_preserved() {
        let hub = LoopbackHub::new();
        let mut gate_a = ReplicationGate::new(Box::new(hub.endpoint(0)), 0);
        let mut gate_b = ReplicationGate::new(Box::new(hub.endpoint(1)), 1);

        gate_a.issue(RemoteCall::Pickup {
            carryable: 7,
            carrier: 0,
        });
        gate_a.issue(RemoteCall::Throw {
            carryable: 7,
            carrier: 0,
            power: 3.0,
            position: [0.0; 3],
            yaw: 0.0,
        });

        let received = gate_b.drain();
        assert_eq!(received.len(), 2);
        assert!(matches!(
            received[0],
            WireMessage::Call(RemoteCall::Pickup { .. })
        ));
        assert!(matches!(
            received[1],
            WireMessage::Call(RemoteCall::Throw { .. })
        ));
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let hub = LoopbackHub::new();
        let mut raw = hub.endpoint(0);
        let mut gate = ReplicationGate::new(Box::new(hub.endpoint(1)), 1);

        raw.broadcast(vec![0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(gate.drain().is_empty());
    }

    #[test]
    fn test_status_line_for_disconnect() {
        assert_eq!(ConnectionStatus::Connected.status_line(), None);
        assert_eq!(
            ConnectionStatus::Disconnected.status_line(),
            Some("Network error, please check your connection")
        );
    }
}
