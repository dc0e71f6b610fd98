//! Remote-call and replication message types.
//!
//! A remote call carries everything a peer needs to replay one logical state
//! transition: there is no companion message whose delivery order matters.
//! Transform samples are idempotent snapshots, safe to drop or reorder.

use serde::{Deserialize, Serialize};

/// Index of a player (human or bot) inside the session's player arena.
pub type ActorId = u32;

/// Index of a carryable object inside the session's carryable arena.
pub type CarryableId = u32;

/// A participant in the match. Exactly one peer is authoritative per object.
pub type PeerId = u32;

/// Error type for wire encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("wire codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// A state-changing event, issued by the authoritative peer and executed
/// identically by every peer (including the issuer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteCall {
    /// A carrier takes a carryable out of the world and into its hands.
    Pickup {
        carryable: CarryableId,
        carrier: ActorId,
    },
    /// A carried object is released into flight. Carries the full launch
    /// state so no peer has to derive it from its own (possibly stale) copy
    /// of the carrier.
    Throw {
        carryable: CarryableId,
        carrier: ActorId,
        power: f32,
        position: [f32; 3],
        yaw: f32,
    },
    /// A thrown object touched stable ground for the first time.
    Landed {
        carryable: CarryableId,
        position: [f32; 3],
    },
    /// A character takes damage at a world-space hit point.
    Damage {
        actor: ActorId,
        amount: i32,
        hit_point: [f32; 3],
    },
}

/// One sample of the continuous position/heading replication stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformSample {
    pub position: [f32; 3],
    pub yaw: f32,
}

/// Envelope for everything that crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Call(RemoteCall),
    CharacterTransform {
        actor: ActorId,
        sample: TransformSample,
    },
    CarryableTransform {
        carryable: CarryableId,
        sample: TransformSample,
    },
}

impl WireMessage {
    /// Serialize the message to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserialize a message from wire bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        Ok(postcard::from_bytes(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_call_roundtrip() {
        let call = WireMessage::Call(RemoteCall::Throw {
            carryable: 2,
            carrier: 1,
            power: 7.5,
            position: [1.0, 3.0, -2.0],
            yaw: 1.25,
        });

        let bytes = call.to_bytes().expect("encode");
        let decoded = WireMessage::from_bytes(&bytes).expect("decode");
        assert_eq!(call, decoded);
    }

    #[test]
    fn test_transform_sample_roundtrip() {
        let msg = WireMessage::CharacterTransform {
            actor: 4,
            sample: TransformSample {
                position: [0.5, 2.0, 9.0],
                yaw: -0.5,
            },
        };

        let bytes = msg.to_bytes().expect("encode");
        assert_eq!(msg, WireMessage::from_bytes(&bytes).expect("decode"));
    }

    #[test]
    fn test_truncated_bytes_fail() {
        let msg = WireMessage::Call(RemoteCall::Pickup {
            carryable: 0,
            carrier: 3,
        });
        let bytes = msg.to_bytes().expect("encode");
        assert!(WireMessage::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
