//! Rumble-Live Protocol Library
//!
//! Wire schema shared by every peer: remote-call messages for state-changing
//! events (pickup, throw, landing, damage) and the continuous transform
//! replication stream for non-authoritative copies.
//!
//! Messages are plain serde types encoded with `postcard`; every peer decodes
//! and applies them identically.

pub mod messages;

pub use messages::{
    ActorId, CarryableId, PeerId, ProtoError, RemoteCall, TransformSample, WireMessage,
};
