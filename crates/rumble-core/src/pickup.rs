//! Carryable objects: the pickup / carry / throw / land cycle.
//!
//! A carryable is a second kinematic object whose ownership moves between the
//! world (physics active), a carrier's anchor (physics disabled, transform
//! driven by the carrier), and flight (physics active, velocity driven,
//! armed for impact damage). It is spawned once per match and cycles through
//! these states any number of times.
//!
//! All transitions are applied through the replication gate so every peer
//! executes them identically; the methods here are the per-peer appliers.

use nalgebra::{UnitQuaternion, Vector3};

use rumble_proto::{ActorId, CarryableId, PeerId};

use crate::collision::{ColliderId, CollisionWorld};
use crate::config::ThrowTuning;
use crate::motor::{CharacterBehavior, KinematicMotor, MotorContext};
use crate::util::yaw_rotation;

/// Where the carryable currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarryState {
    /// Free in the world, physics active.
    World,
    /// In a carrier's hands, physics disabled, transform follows the anchor.
    Carried { carrier: ActorId },
    /// In flight after a throw.
    Thrown { thrower: ActorId },
}

/// Throw power for a given warmup heat. Monotonically non-decreasing in
/// `heat`; heat saturates at `max_warmup`.
pub fn throw_power(heat: f32, tuning: &ThrowTuning) -> f32 {
    tuning.min_throw_power + heat.clamp(0.0, tuning.max_warmup) * tuning.throw_power_scale
}

/// Motor behavior while the carryable is free or in flight: gravity plus
/// landing detection. Everything else is a no-op.
#[derive(Debug)]
pub struct FlightBehavior {
    gravity: Vector3<f32>,
    pub ignored_colliders: Vec<ColliderId>,
    landed_at: Option<Vector3<f32>>,
}

impl CharacterBehavior for FlightBehavior {
    fn update_velocity(
        &mut self,
        velocity: &mut Vector3<f32>,
        _ctx: &mut MotorContext<'_>,
        dt: f32,
    ) {
        *velocity += self.gravity * dt;
    }

    fn post_grounding_update(&mut self, ctx: &mut MotorContext<'_>, _dt: f32) {
        if ctx.grounding().is_stable_on_ground && !ctx.last_grounding().is_stable_on_ground {
            self.landed_at = Some(ctx.position());
        }
    }

    fn is_collider_valid(&self, collider: ColliderId) -> bool {
        !self.ignored_colliders.contains(&collider)
    }
}

/// One carryable object.
pub struct Carryable {
    pub id: CarryableId,
    /// Peer authoritative for this object's simulation.
    pub owner: PeerId,
    pub motor: KinematicMotor,
    pub flight: FlightBehavior,
    pub state: CarryState,
    /// Armed for impact damage while true; cleared on the first character
    /// hit so an incidental second collision cannot double-damage.
    pub is_thrown: bool,
    /// This object's collider in the collision world. Disabled while
    /// carried.
    pub collider: ColliderId,
    /// The character this carryable embodies, if it is a player.
    pub cargo: Option<ActorId>,
    /// Anchor-local carry offset and yaw, chosen at pickup.
    pub carry_offset: Vector3<f32>,
    pub carry_yaw: f32,
}

impl Carryable {
    pub fn new(
        id: CarryableId,
        owner: PeerId,
        motor: KinematicMotor,
        collider: ColliderId,
        gravity: Vector3<f32>,
        cargo: Option<ActorId>,
    ) -> Self {
        Self {
            id,
            owner,
            motor,
            // A carryable never collides with its own world collider.
            flight: FlightBehavior {
                gravity,
                ignored_colliders: vec![collider],
                landed_at: None,
            },
            state: CarryState::World,
            is_thrown: false,
            collider,
            cargo,
            carry_offset: Vector3::zeros(),
            carry_yaw: 0.0,
        }
    }

    pub fn is_carried(&self) -> bool {
        matches!(self.state, CarryState::Carried { .. })
    }

    /// World → Carried applier.
    pub fn begin_carry(&mut self, carrier: ActorId, offset: Vector3<f32>, yaw: f32) {
        self.motor.enabled = false;
        self.motor.base_velocity = Vector3::zeros();
        self.state = CarryState::Carried { carrier };
        self.carry_offset = offset;
        self.carry_yaw = yaw;
        tracing::debug!("[pickup] carryable {} carried by actor {carrier}", self.id);
    }

    /// Carried → Thrown applier. Launch state comes entirely from the remote
    /// call, never from the local copy of the carrier.
    pub fn begin_flight(&mut self, thrower: ActorId, power: f32, position: Vector3<f32>, yaw: f32) {
        let heading = yaw_rotation(yaw);
        self.motor
            .set_position_and_rotation(position, heading);
        self.motor.enabled = true;
        self.motor.base_velocity = heading * Vector3::z() * power;
        self.motor.force_unground();
        self.state = CarryState::Thrown { thrower };
        self.is_thrown = true;
        self.flight.landed_at = None;
        tracing::debug!(
            "[pickup] carryable {} thrown by actor {thrower} power {power}",
            self.id
        );
    }

    /// Thrown → World applier (also used for plain drops).
    pub fn settle(&mut self, position: Vector3<f32>) {
        self.motor.base_velocity = Vector3::zeros();
        self.motor.set_position(position);
        self.state = CarryState::World;
        self.is_thrown = false;
    }

    /// Drives the motor while the object is free or in flight.
    pub fn update(&mut self, world: &CollisionWorld, dt: f32) {
        if self.is_carried() {
            return;
        }
        self.motor.update(world, &mut self.flight, dt);
    }

    /// Follows the carrier's anchor while carried.
    pub fn follow_anchor(&mut self, carrier_position: Vector3<f32>, carrier_rotation: UnitQuaternion<f32>) {
        let anchor = carrier_position + carrier_rotation * self.carry_offset;
        self.motor
            .set_position_and_rotation(anchor, carrier_rotation * yaw_rotation(self.carry_yaw));
    }

    /// The landing position, if a landing edge occurred since the last call.
    /// Only the authoritative peer turns this into a remote call.
    pub fn take_landing(&mut self) -> Option<Vector3<f32>> {
        self.flight.landed_at.take()
    }
}
