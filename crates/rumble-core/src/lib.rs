//! Rumble-Live Core Library
//!
//! Kinematic character movement and event-driven state synchronization for a
//! multiplayer party brawler. Single-threaded, tick-driven and deterministic:
//! the authoritative peer for each object simulates it, state-changing events
//! travel as remote calls that every peer replays identically, and everyone
//! else renders a replicated transform stream.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod collision;
pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod input;
pub mod motor;
pub mod pickup;
pub mod pool;
pub mod replication;
pub mod scheduler;
pub mod session;
pub mod util;

pub use collision::{ColliderId, CollisionWorld, SweepHit};
pub use config::{CombatTuning, GameConfig, MovementTuning, SessionTuning, ThrowTuning};
pub use controller::{
    BonusOrientationMethod, CharacterController, CharacterState, ControllerEvent,
};
pub use entity::EntityState;
pub use error::ConfigError;
pub use input::{InputState, OrientationMethod};
pub use motor::{
    CharacterBehavior, GroundingReport, KinematicMotor, MotorContext, MovementHit, SKIN_WIDTH,
};
pub use pickup::{CarryState, Carryable, throw_power};
pub use pool::{EffectKind, EffectPool, EffectSink, HealthSink, PooledEffect, PooledEffectSink};
pub use replication::{
    Authority, ConnectionStatus, LoopbackHub, LoopbackTransport, ReplicationGate, Transport,
};
pub use scheduler::{ScheduledAction, TickScheduler};
pub use session::{BotLoadout, FIXED_DT, GameSession, PlayerSlot, ticks};
