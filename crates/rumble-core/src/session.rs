//! Game session: the composition root.
//!
//! Owns the player and carryable arenas, the collision world, the
//! replication gate, the tick scheduler, the effect pools and the seeded
//! RNG, all constructed explicitly and injected at startup. Cross-object
//! references are arena indices validated at use; nothing holds a direct
//! reference to anything else.
//!
//! Two tick phases drive the simulation:
//! - `fixed_tick` (fixed timestep): wire apply, motor updates in exact
//!   callback order, impact checks, scheduled actions, out-of-bounds
//!   recovery, outgoing replication.
//! - `frame_update` (variable timestep): input sampling and visual-only
//!   state (blink timers, pooled effect lifetimes).

use nalgebra::Vector3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use rumble_proto::{ActorId, CarryableId, PeerId, RemoteCall, TransformSample, WireMessage};

use crate::collision::CollisionWorld;
use crate::config::GameConfig;
use crate::controller::{CharacterController, ControllerEvent};
use crate::entity::EntityState;
use crate::error::ConfigError;
use crate::input::InputState;
use crate::motor::KinematicMotor;
use crate::pickup::{CarryState, Carryable, throw_power};
use crate::pool::{EffectKind, EffectSink, HealthSink};
use crate::replication::{Authority, ConnectionStatus, ReplicationGate, Transport};
use crate::scheduler::{ScheduledAction, TickScheduler};
use crate::util::{EPSILON, yaw_of, yaw_rotation};

/// Fixed physics timestep (60 Hz).
pub const FIXED_DT: f32 = 1.0 / 60.0;

/// Forward reach of the pickup assist probe.
const PICKUP_ASSIST_DISTANCE: f32 = 1.0;

/// Converts a duration in seconds to a whole number of fixed ticks.
pub fn ticks(seconds: f32) -> u64 {
    (seconds / FIXED_DT).ceil() as u64
}

/// Cosmetic loadout rolled for server-authoritative bots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotLoadout {
    pub character: u32,
    pub skin: u32,
}

/// One player (human or bot) in the arena.
pub struct PlayerSlot {
    pub actor: ActorId,
    pub authority: Authority,
    pub controller: CharacterController,
    pub motor: KinematicMotor,
    pub entity: EntityState,
    pub input: InputState,
    /// This player's own throwable body.
    pub carryable: CarryableId,
    /// What this player is holding, if anything.
    pub carrying: Option<CarryableId>,
    /// True while another character is holding this one.
    pub carried: bool,
    /// Renderer hint: draw with the in-hand outline pass.
    pub in_hand_outline: bool,
    pub bot: Option<BotLoadout>,
}

/// The match simulation for one peer.
pub struct GameSession {
    config: GameConfig,
    world: CollisionWorld,
    gate: ReplicationGate,
    scheduler: TickScheduler,
    effects: Box<dyn EffectSink>,
    health: Box<dyn HealthSink>,
    players: Vec<PlayerSlot>,
    carryables: Vec<Carryable>,
    spawn_points: Vec<(Vector3<f32>, f32)>,
    rng: ChaCha8Rng,
    tick: u64,
    host_peer: PeerId,
}

impl GameSession {
    /// Builds a session. Fails fast on broken configuration; the simulation
    /// never starts with one.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GameConfig,
        world: CollisionWorld,
        spawn_points: Vec<(Vector3<f32>, f32)>,
        transport: Box<dyn Transport>,
        local_peer: PeerId,
        host_peer: PeerId,
        seed: u64,
        effects: Box<dyn EffectSink>,
        health: Box<dyn HealthSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if spawn_points.is_empty() {
            return Err(ConfigError::NoSpawnPoints);
        }
        Ok(Self {
            config,
            world,
            gate: ReplicationGate::new(transport, local_peer),
            scheduler: TickScheduler::new(),
            effects,
            health,
            players: Vec::new(),
            carryables: Vec::new(),
            spawn_points,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            host_peer,
        })
    }

    pub fn local_peer(&self) -> PeerId {
        self.gate.local_peer
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.gate.status()
    }

    pub fn player(&self, actor: ActorId) -> Option<&PlayerSlot> {
        self.players.iter().find(|p| p.actor == actor)
    }

    pub fn player_mut(&mut self, actor: ActorId) -> Option<&mut PlayerSlot> {
        self.players.iter_mut().find(|p| p.actor == actor)
    }

    pub fn carryable(&self, id: CarryableId) -> Option<&Carryable> {
        self.carryables.iter().find(|c| c.id == id)
    }

    pub fn world_mut(&mut self) -> &mut CollisionWorld {
        &mut self.world
    }

    /// Input edges from the platform layer land here.
    pub fn input_mut(&mut self, actor: ActorId) -> Option<&mut InputState> {
        self.players
            .iter_mut()
            .find(|p| p.actor == actor)
            .map(|p| &mut p.input)
    }

    /// Spawns a player owned by `peer` at the next spawn point, together
    /// with its throwable body. Spawn order is part of the shared session
    /// setup, so every peer builds identical arenas.
    pub fn spawn_player(&mut self, peer: PeerId) -> ActorId {
        self.spawn_slot(peer, None)
    }

    /// Spawns `count` server-authoritative bots with RNG-rolled loadouts.
    pub fn spawn_bots(&mut self, count: usize) {
        let character_variants = self.config.session.character_variants;
        let skin_variants = self.config.session.skin_variants;
        for _ in 0..count {
            let loadout = BotLoadout {
                character: self.rng.random_range(0..character_variants),
                skin: self.rng.random_range(0..skin_variants),
            };
            self.spawn_slot(self.host_peer, Some(loadout));
        }
    }

    /// Spawns a free carryable item (not a character body).
    pub fn spawn_item(&mut self, position: Vector3<f32>, owner: PeerId) -> CarryableId {
        self.spawn_carryable(position, owner, None)
    }

    fn spawn_slot(&mut self, peer: PeerId, bot: Option<BotLoadout>) -> ActorId {
        let actor = self.players.len() as ActorId;
        let (position, yaw) = self.spawn_points[actor as usize % self.spawn_points.len()];
        let movement = self.config.movement.clone();
        let is_bot = bot.is_some();

        let mut motor = KinematicMotor::new(
            position,
            movement.capsule_radius,
            movement.standing_height,
        )
        .expect("capsule dimensions validated with the config");
        motor.set_rotation(yaw_rotation(yaw));
        let authority = Authority::new(peer);
        motor.enabled = authority.is_mine(self.gate.local_peer);

        let carryable = self.spawn_carryable(position, peer, Some(actor));

        self.players.push(PlayerSlot {
            actor,
            authority,
            controller: CharacterController::new(movement),
            motor,
            entity: EntityState::new(position, yaw, self.config.combat.blink_interval),
            input: InputState::default(),
            carryable,
            carrying: None,
            carried: false,
            in_hand_outline: false,
            bot,
        });
        tracing::info!("[session] spawned actor {actor} (peer {peer}, bot: {is_bot})");
        actor
    }

    fn spawn_carryable(
        &mut self,
        position: Vector3<f32>,
        owner: PeerId,
        cargo: Option<ActorId>,
    ) -> CarryableId {
        let id = self.carryables.len() as CarryableId;
        let motor = KinematicMotor::new(position, 0.4, 0.8)
            .expect("carryable capsule dimensions are constant");
        let (shape, pose) = motor.capsule_pose();
        let collider = self
            .world
            .add_shape(parry3d::shape::SharedShape::new(shape), pose);
        // A character's body hitbox only materializes while it flies.
        if cargo.is_some() {
            self.world.set_enabled(collider, false);
        }
        let gravity = Vector3::from(self.config.movement.gravity);
        self.carryables
            .push(Carryable::new(id, owner, motor, collider, gravity, cargo));
        id
    }

    // ------------------------------------------------------------------
    // Local action requests (authoritative peer only)
    // ------------------------------------------------------------------

    /// Tries to grab the nearest carryable inside the assist sphere in front
    /// of the character.
    pub fn pickup_action(&mut self, actor: ActorId) {
        let local = self.gate.local_peer;
        let Some(slot) = self.players.iter().find(|p| p.actor == actor) else {
            return;
        };
        if !slot.authority.is_mine(local) || slot.carried || slot.carrying.is_some() {
            return;
        }

        let up = slot.motor.character_up();
        let forward = slot.motor.character_forward();
        let assist_center = slot.motor.transient_position
            + up * (self.config.movement.standing_height / 2.0)
            + forward * PICKUP_ASSIST_DISTANCE;

        let mut best: Option<(CarryableId, f32)> = None;
        for c in &self.carryables {
            if c.state != CarryState::World || c.cargo == Some(actor) {
                continue;
            }
            // A body is only grabbable while its character is in play.
            if let Some(victim) = c.cargo {
                if self.players.iter().any(|p| p.actor == victim && p.carried) {
                    continue;
                }
            }
            let distance = (c.motor.transient_position - assist_center).norm();
            let reach = self.config.throwing.aim_radius + c.motor.capsule_radius();
            if distance <= reach && best.is_none_or(|(_, d)| distance < d) {
                best = Some((c.id, distance));
            }
        }

        if let Some((carryable, _)) = best {
            self.gate.issue(RemoteCall::Pickup { carryable, carrier: actor });
        }
    }

    /// Releases the held object with the given warmup heat.
    pub fn throw_action(&mut self, actor: ActorId, heat: f32) {
        let local = self.gate.local_peer;
        let Some(slot) = self.players.iter().find(|p| p.actor == actor) else {
            return;
        };
        if !slot.authority.is_mine(local) {
            return;
        }
        let Some(carryable) = slot.carrying else {
            return;
        };
        let Some(c) = self.carryables.iter().find(|c| c.id == carryable) else {
            return;
        };

        let power = throw_power(heat, &self.config.throwing);
        let yaw = yaw_of(&slot.motor.character_forward());
        let position: [f32; 3] = c.motor.transient_position.into();
        self.gate.issue(RemoteCall::Throw {
            carryable,
            carrier: actor,
            power,
            position,
            yaw,
        });
    }

    /// Charges the character toward a destination (dash/ability entry).
    /// Movement replicates through the transform stream, so no remote call.
    pub fn dash_to_target(
        &mut self,
        actor: ActorId,
        destination: Vector3<f32>,
        seconds_to_target: f32,
        charge_speed: f32,
    ) {
        let local = self.gate.local_peer;
        if let Some(slot) = self
            .players
            .iter_mut()
            .find(|p| p.actor == actor && p.authority.is_mine(local))
        {
            let position = slot.motor.transient_position;
            slot.controller
                .dash_to_target(destination, seconds_to_target, charge_speed, position);
        }
    }

    /// Requests damage against a character. Gated on the local view of its
    /// invincibility window; the resulting remote call applies identically
    /// on every peer.
    pub fn request_damage(&mut self, actor: ActorId, amount: i32, hit_point: Vector3<f32>) {
        let Some(slot) = self.players.iter().find(|p| p.actor == actor) else {
            return;
        };
        if !slot.entity.can_take_damage() {
            return;
        }
        self.gate.issue(RemoteCall::Damage {
            actor,
            amount,
            hit_point: hit_point.into(),
        });
    }

    // ------------------------------------------------------------------
    // Tick phases
    // ------------------------------------------------------------------

    /// Variable-rate frame phase: input sampling and visual-only updates.
    pub fn frame_update(&mut self, dt: f32) {
        let local = self.gate.local_peer;
        for slot in &mut self.players {
            if slot.authority.is_mine(local) && !slot.carried {
                slot.controller.set_inputs(&slot.input);
            }
            slot.entity.tick_blink(dt);
        }
        self.effects.tick(dt);
    }

    /// Fixed-timestep physics phase.
    pub fn fixed_tick(&mut self) {
        let dt = FIXED_DT;
        let local = self.gate.local_peer;

        // 1. Apply everything received from the gate, own calls included.
        for message in self.gate.drain() {
            match message {
                WireMessage::Call(call) => self.apply_remote_call(call),
                WireMessage::CharacterTransform { actor, sample } => {
                    self.apply_character_transform(actor, sample);
                }
                WireMessage::CarryableTransform { carryable, sample } => {
                    self.apply_carryable_transform(carryable, sample);
                }
            }
        }

        let mut outgoing: Vec<RemoteCall> = Vec::new();

        // 2. Simulate locally-owned characters, exact callback order per
        //    character.
        for i in 0..self.players.len() {
            let slot = &mut self.players[i];
            if !slot.authority.is_mine(local) || slot.carried {
                continue;
            }
            let PlayerSlot {
                motor,
                controller,
                input,
                ..
            } = slot;
            motor.update(&self.world, controller, dt);
            for event in controller.take_events() {
                if event == ControllerEvent::Landed {
                    // A held jump is spent on landing.
                    input.release_jump();
                }
            }
        }

        // 3. Carried carryables ride their carrier's anchor; dormant
        //    character bodies ride their character. Same rule on every peer.
        for ci in 0..self.carryables.len() {
            match self.carryables[ci].state {
                CarryState::Carried { carrier } => {
                    if let Some(slot) = self.players.iter().find(|p| p.actor == carrier) {
                        let position = slot.motor.transient_position;
                        let rotation = slot.motor.transient_rotation;
                        self.carryables[ci].follow_anchor(position, rotation);
                    }
                }
                CarryState::World => {
                    if let Some(cargo) = self.carryables[ci].cargo {
                        if let Some(slot) =
                            self.players.iter().find(|p| p.actor == cargo && !p.carried)
                        {
                            let center = slot.motor.transient_position
                                + slot.motor.character_up()
                                    * (self.config.movement.standing_height / 2.0);
                            let rotation = slot.motor.transient_rotation;
                            self.carryables[ci]
                                .motor
                                .set_position_and_rotation(center, rotation);
                        }
                    }
                }
                CarryState::Thrown { .. } => {}
            }
        }

        // 4. Simulate locally-owned free carryables.
        for ci in 0..self.carryables.len() {
            let c = &mut self.carryables[ci];
            if c.owner != local || c.is_carried() {
                continue;
            }
            if matches!(c.state, CarryState::World if c.cargo.is_some()) {
                // Dormant body, driven by its character above.
                continue;
            }
            c.update(&self.world, dt);
            if let Some(position) = c.take_landing() {
                outgoing.push(RemoteCall::Landed {
                    carryable: c.id,
                    position: position.into(),
                });
            }
        }

        // 5. Thrown-impact checks, decided by the thrown object's owner.
        let mut disarmed: Vec<usize> = Vec::new();
        for ci in 0..self.carryables.len() {
            let c = &self.carryables[ci];
            if c.owner != local || !c.is_thrown {
                continue;
            }
            let CarryState::Thrown { thrower } = c.state else {
                continue;
            };
            let (c_shape, c_pose) = c.motor.capsule_pose();
            for slot in &self.players {
                if slot.actor == thrower || slot.carried || Some(slot.actor) == c.cargo {
                    continue;
                }
                let (p_shape, p_pose) = slot.motor.capsule_pose();
                let overlapping =
                    parry3d::query::intersection_test(&c_pose, &c_shape, &p_pose, &p_shape)
                        .unwrap_or(false);
                if overlapping && slot.entity.can_take_damage() {
                    let direction = c
                        .motor
                        .base_velocity
                        .try_normalize(EPSILON)
                        .unwrap_or_else(Vector3::z);
                    let knock = direction * self.config.throwing.impact_speed;
                    outgoing.push(RemoteCall::Damage {
                        actor: slot.actor,
                        amount: self.config.combat.impact_damage,
                        hit_point: knock.into(),
                    });
                    disarmed.push(ci);
                    break;
                }
            }
        }
        for ci in disarmed {
            self.carryables[ci].is_thrown = false;
        }

        // 6. Scheduled follow-ups.
        for action in self.scheduler.drain_due(self.tick) {
            match action {
                ScheduledAction::RearmCarryableCollision { carryable, carrier } => {
                    let collider = self
                        .carryables
                        .iter()
                        .find(|c| c.id == carryable)
                        .map(|c| c.collider);
                    if let (Some(collider), Some(slot)) = (
                        collider,
                        self.players.iter_mut().find(|p| p.actor == carrier),
                    ) {
                        slot.controller
                            .ignored_colliders
                            .retain(|id| *id != collider);
                    }
                }
            }
        }

        // 7. Out-of-bounds recovery, through the ordinary remote-call path
        //    so every peer stays consistent.
        for i in 0..self.players.len() {
            let slot = &self.players[i];
            if !slot.authority.is_mine(local) || slot.carried {
                continue;
            }
            if slot.motor.transient_position.y >= self.config.session.kill_plane_y {
                continue;
            }
            let actor = slot.actor;
            let body = slot.carryable;
            let (spawn_position, spawn_yaw) = slot.entity.spawn_pose();
            tracing::info!("[session] actor {actor} fell out of bounds, respawning");

            if let Some(held) = slot.carrying {
                // Force-release whatever we were holding.
                outgoing.push(RemoteCall::Throw {
                    carryable: held,
                    carrier: actor,
                    power: 0.0,
                    position: spawn_position.into(),
                    yaw: spawn_yaw,
                });
            }
            outgoing.push(RemoteCall::Pickup {
                carryable: body,
                carrier: actor,
            });
            outgoing.push(RemoteCall::Throw {
                carryable: body,
                carrier: actor,
                power: 0.0,
                position: spawn_position.into(),
                yaw: spawn_yaw,
            });

            let slot = &mut self.players[i];
            slot.motor
                .set_position_and_rotation(spawn_position, yaw_rotation(spawn_yaw));
            slot.motor.base_velocity = Vector3::zeros();
        }

        // 8. Issue this tick's remote calls.
        for call in outgoing {
            self.gate.issue(call);
        }

        // 9. Replicate transforms of everything we own; sync collider poses.
        for i in 0..self.players.len() {
            let slot = &self.players[i];
            if !slot.authority.is_mine(local) || slot.carried {
                continue;
            }
            let sample = TransformSample {
                position: slot.motor.transient_position.into(),
                yaw: yaw_of(&slot.motor.character_forward()),
            };
            let actor = slot.actor;
            self.gate.send_character_transform(actor, sample);
        }
        for ci in 0..self.carryables.len() {
            let c = &self.carryables[ci];
            let pose = c.motor.capsule_pose().1;
            let collider = c.collider;
            self.world.set_pose(collider, pose);

            if c.owner == local && !c.is_carried() {
                let sample = TransformSample {
                    position: c.motor.transient_position.into(),
                    yaw: yaw_of(&c.motor.character_forward()),
                };
                let id = c.id;
                self.gate.send_carryable_transform(id, sample);
            }
        }

        // 10. Invincibility expiry clears the collision-ignore list.
        for slot in &mut self.players {
            if slot.entity.expire_if_due(self.tick) {
                slot.controller.ignored_colliders.clear();
            }
        }

        self.tick += 1;
    }

    // ------------------------------------------------------------------
    // Remote-call appliers: executed identically on every peer.
    // ------------------------------------------------------------------

    fn apply_remote_call(&mut self, call: RemoteCall) {
        match call {
            RemoteCall::Pickup { carryable, carrier } => self.apply_pickup(carryable, carrier),
            RemoteCall::Throw {
                carryable,
                carrier,
                power,
                position,
                yaw,
            } => self.apply_throw(carryable, carrier, power, Vector3::from(position), yaw),
            RemoteCall::Landed {
                carryable,
                position,
            } => self.apply_landed(carryable, Vector3::from(position)),
            RemoteCall::Damage {
                actor,
                amount,
                hit_point,
            } => self.apply_damage(actor, amount, Vector3::from(hit_point)),
        }
    }

    fn apply_pickup(&mut self, carryable: CarryableId, carrier: ActorId) {
        let Some(ci) = self.carryables.iter().position(|c| c.id == carryable) else {
            tracing::warn!("[sync] pickup for unknown carryable {carryable}");
            return;
        };
        if self.players.iter().all(|p| p.actor != carrier) {
            tracing::warn!("[sync] pickup by unknown actor {carrier}");
            return;
        }

        let cargo = self.carryables[ci].cargo;
        let (offset, yaw) = if cargo.is_some() {
            // Characters ride on the shoulder, turned sideways.
            (Vector3::new(0.0, 0.5, 0.0), -std::f32::consts::FRAC_PI_2)
        } else {
            (Vector3::new(0.0, self.config.throwing.throw_height, 0.0), 0.0)
        };

        if let Some(victim) = cargo {
            if let Some(vslot) = self.players.iter_mut().find(|p| p.actor == victim) {
                vslot.carried = true;
                vslot.in_hand_outline = true;
                vslot.motor.enabled = false;
                vslot.motor.base_velocity = Vector3::zeros();
                vslot.controller.pull_and_drop();
            }
        }

        let collider = self.carryables[ci].collider;
        self.world.set_enabled(collider, false);
        self.carryables[ci].begin_carry(carrier, offset, yaw);

        if let Some(slot) = self.players.iter_mut().find(|p| p.actor == carrier) {
            slot.controller.ignored_colliders.push(collider);
            slot.carrying = Some(carryable);
        }
    }

    fn apply_throw(
        &mut self,
        carryable: CarryableId,
        carrier: ActorId,
        power: f32,
        position: Vector3<f32>,
        yaw: f32,
    ) {
        let Some(ci) = self.carryables.iter().position(|c| c.id == carryable) else {
            tracing::warn!("[sync] throw for unknown carryable {carryable}");
            return;
        };

        self.carryables[ci].begin_flight(carrier, power, position, yaw);
        let collider = self.carryables[ci].collider;
        self.world.set_enabled(collider, true);

        if let Some(slot) = self.players.iter_mut().find(|p| p.actor == carrier) {
            slot.carrying = None;
        }
        // The carrier passes through the object for a short grace window.
        self.scheduler.schedule(
            self.tick + ticks(self.config.throwing.rearm_delay),
            ScheduledAction::RearmCarryableCollision { carryable, carrier },
        );
    }

    fn apply_landed(&mut self, carryable: CarryableId, position: Vector3<f32>) {
        let Some(ci) = self.carryables.iter().position(|c| c.id == carryable) else {
            tracing::warn!("[sync] landing for unknown carryable {carryable}");
            return;
        };
        let local = self.gate.local_peer;

        self.carryables[ci].settle(position);
        let cargo = self.carryables[ci].cargo;

        if let Some(victim) = cargo {
            // The body hitbox goes dormant; the character takes over again.
            let collider = self.carryables[ci].collider;
            self.world.set_enabled(collider, false);

            let invincibility = ticks(self.config.combat.invincibility_length);
            let amount = self.config.combat.impact_damage;
            if let Some(vslot) = self.players.iter_mut().find(|p| p.actor == victim) {
                vslot.carried = false;
                vslot.in_hand_outline = false;
                vslot.motor.enabled = vslot.authority.is_mine(local);
                vslot.motor.set_position(position);
                vslot.motor.base_velocity = Vector3::zeros();
                vslot.controller.release_restraints();
                // Stand-up: brief i-frames plus the landing toll.
                vslot.entity.start_invincibility(self.tick, invincibility);
            }
            self.health.adjust_health(victim, -amount);
        }

        self.effects.play_effect(EffectKind::LandSmoke, position);
    }

    fn apply_damage(&mut self, actor: ActorId, amount: i32, hit_point: Vector3<f32>) {
        let local = self.gate.local_peer;
        let invincibility = ticks(self.config.combat.invincibility_length);
        let Some(slot) = self.players.iter_mut().find(|p| p.actor == actor) else {
            tracing::warn!("[sync] damage for unknown actor {actor}");
            return;
        };
        // Accepted while invincible, but the window never stacks and the
        // health toll is not paid twice.
        if slot.entity.is_invincible {
            return;
        }

        let mut knock = hit_point;
        knock.y = 4.0;
        if slot.authority.is_mine(local) {
            slot.motor.force_unground();
            slot.controller.add_velocity(knock);
        }
        slot.entity.start_invincibility(self.tick, invincibility);
        let position = slot.motor.transient_position;

        self.health.adjust_health(actor, -amount);
        self.effects.play_effect(EffectKind::ImpactAudio, position);
        tracing::info!("[session] actor {actor} took {amount} damage");
    }

    fn apply_character_transform(&mut self, actor: ActorId, sample: TransformSample) {
        let local = self.gate.local_peer;
        if let Some(slot) = self.players.iter_mut().find(|p| p.actor == actor) {
            // Own echoes are ignored; the motor is authoritative here.
            if slot.authority.is_mine(local) {
                return;
            }
            slot.motor.set_position_and_rotation(
                Vector3::from(sample.position),
                yaw_rotation(sample.yaw),
            );
        }
    }

    fn apply_carryable_transform(&mut self, carryable: CarryableId, sample: TransformSample) {
        let local = self.gate.local_peer;
        if let Some(c) = self.carryables.iter_mut().find(|c| c.id == carryable) {
            if c.owner == local || c.is_carried() {
                return;
            }
            c.motor.set_position_and_rotation(
                Vector3::from(sample.position),
                yaw_rotation(sample.yaw),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::replication::LoopbackHub;

    #[derive(Clone, Default)]
    struct RecordingHealth(Rc<RefCell<Vec<(ActorId, i32)>>>);

    impl HealthSink for RecordingHealth {
        fn adjust_health(&mut self, actor: ActorId, delta: i32) {
            self.0.borrow_mut().push((actor, delta));
        }
    }

    #[derive(Clone, Default)]
    struct RecordingEffects(Rc<RefCell<Vec<EffectKind>>>);

    impl EffectSink for RecordingEffects {
        fn play_effect(&mut self, kind: EffectKind, _position: Vector3<f32>) {
            self.0.borrow_mut().push(kind);
        }
    }

    struct Peer {
        session: GameSession,
        health: RecordingHealth,
        effects: RecordingEffects,
    }

    fn arena_world() -> CollisionWorld {
        let mut world = CollisionWorld::new();
        world.add_box(
            Vector3::new(0.0, -0.5, 0.0),
            Vector3::new(100.0, 0.5, 100.0),
        );
        world
    }

    fn spawn_points() -> Vec<(Vector3<f32>, f32)> {
        vec![
            (Vector3::new(0.0, 0.05, 0.0), 0.0),
            (Vector3::new(0.0, 0.05, 1.2), std::f32::consts::PI),
        ]
    }

    fn make_peer(hub: &LoopbackHub, local: PeerId, seed: u64) -> Peer {
        let health = RecordingHealth::default();
        let effects = RecordingEffects::default();
        let session = GameSession::new(
            GameConfig::default(),
            arena_world(),
            spawn_points(),
            Box::new(hub.endpoint(local)),
            local,
            0,
            seed,
            Box::new(effects.clone()),
            Box::new(health.clone()),
        )
        .expect("session");
        Peer {
            session,
            health,
            effects,
        }
    }

    fn step(peers: &mut [&mut Peer], n: usize) {
        for _ in 0..n {
            for peer in peers.iter_mut() {
                peer.session.frame_update(FIXED_DT);
                peer.session.fixed_tick();
            }
        }
    }

    #[test]
    fn test_empty_spawn_points_is_fatal() {
        let hub = LoopbackHub::new();
        let result = GameSession::new(
            GameConfig::default(),
            arena_world(),
            Vec::new(),
            Box::new(hub.endpoint(0)),
            0,
            0,
            1,
            Box::new(RecordingEffects::default()),
            Box::new(RecordingHealth::default()),
        );
        assert!(matches!(result, Err(ConfigError::NoSpawnPoints)));
    }

    #[test]
    fn test_bot_loadouts_are_deterministic_across_peers() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 99);
        let mut b = make_peer(&hub, 1, 99);

        for peer in [&mut a, &mut b] {
            peer.session.spawn_player(0);
            peer.session.spawn_bots(3);
        }

        for actor in 1..=3 {
            assert_eq!(
                a.session.player(actor).unwrap().bot,
                b.session.player(actor).unwrap().bot,
                "bot loadouts must match across peers"
            );
        }
    }

    #[test]
    fn test_pickup_throw_land_converges_on_both_peers() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 7);
        let mut b = make_peer(&hub, 1, 7);

        for peer in [&mut a, &mut b] {
            peer.session.spawn_player(0);
            peer.session.spawn_player(1);
        }
        step(&mut [&mut a, &mut b], 30);

        // Peer A grabs the character standing in front of its player.
        a.session.pickup_action(0);
        step(&mut [&mut a, &mut b], 2);

        for peer in [&a, &b] {
            let holder = peer.session.player(0).unwrap();
            let victim = peer.session.player(1).unwrap();
            let body = victim.carryable;
            assert_eq!(holder.carrying, Some(body));
            assert!(victim.carried);
            assert!(victim.in_hand_outline);
            assert!(peer.session.carryable(body).unwrap().is_carried());
        }

        // Both copies of the victim's motor are parked while carried.
        assert!(!a.session.player(1).unwrap().motor.enabled);
        assert!(!b.session.player(1).unwrap().motor.enabled);

        // Release with zero heat: minimum throw power.
        a.session.throw_action(0, 0.0);
        step(&mut [&mut a, &mut b], 2);

        let body = a.session.player(1).unwrap().carryable;
        for peer in [&a, &b] {
            let c = peer.session.carryable(body).unwrap();
            assert_eq!(c.state, CarryState::Thrown { thrower: 0 });
            assert!(c.is_thrown);
        }

        // Fly, land, recover; the rearm window also elapses in here.
        step(&mut [&mut a, &mut b], 60);

        for peer in [&a, &b] {
            let victim = peer.session.player(1).unwrap();
            assert!(!victim.carried);
            assert!(!victim.in_hand_outline);
            assert!(victim.entity.is_invincible);
            let c = peer.session.carryable(body).unwrap();
            assert_eq!(c.state, CarryState::World);
            assert!(!c.is_thrown);
            // Landing toll applied exactly once per peer.
            assert_eq!(
                *peer.health.0.borrow(),
                vec![(1, -(GameConfig::default().combat.impact_damage))]
            );
            // Landing smoke fired from the local pool on each peer.
            assert!(peer.effects.0.borrow().contains(&EffectKind::LandSmoke));
            // Collision-ignore entries from the carry are gone.
            assert!(
                peer.session
                    .player(0)
                    .unwrap()
                    .controller
                    .ignored_colliders
                    .is_empty()
            );
        }

        // The victim's motor only simulates on its own peer again.
        assert!(!a.session.player(1).unwrap().motor.enabled);
        assert!(b.session.player(1).unwrap().motor.enabled);
    }

    #[test]
    fn test_zero_heat_throw_launches_at_min_power() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 7);
        a.session.spawn_player(0);
        a.session.spawn_player(0);
        step(&mut [&mut a], 30);

        a.session.pickup_action(0);
        step(&mut [&mut a], 2);
        let body = a.session.player(1).unwrap().carryable;
        assert!(a.session.carryable(body).unwrap().is_carried());

        a.session.throw_action(0, 0.0);
        step(&mut [&mut a], 1);

        let c = a.session.carryable(body).unwrap();
        let speed = c.motor.base_velocity.norm();
        let min_power = GameConfig::default().throwing.min_throw_power;
        // One tick of gravity at most separates launch speed from min power.
        assert!(
            (speed - min_power).abs() < 1.0,
            "launch speed {speed} should be about {min_power}"
        );
    }

    #[test]
    fn test_out_of_bounds_recovers_through_rpc_path() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 5);
        a.session.spawn_player(0);
        step(&mut [&mut a], 30);

        let spawn = a.session.player(0).unwrap().entity.spawn_pose().0;
        a.session
            .player_mut(0)
            .unwrap()
            .motor
            .set_position(Vector3::new(0.0, -20.0, 0.0));

        step(&mut [&mut a], 60);

        let slot = a.session.player(0).unwrap();
        assert!(!slot.carried);
        assert!(slot.motor.enabled);
        assert!(
            (slot.motor.transient_position - spawn).norm() < 1.0,
            "player should be back near spawn, got {:?}",
            slot.motor.transient_position
        );
        // The recovery rode the ordinary landing path.
        assert!(a.effects.0.borrow().contains(&EffectKind::LandSmoke));
    }

    #[test]
    fn test_damage_is_gated_while_invincible() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 5);
        a.session.spawn_player(0);
        a.session.spawn_player(0);
        step(&mut [&mut a], 30);

        a.session.request_damage(1, 10, Vector3::new(1.0, 0.0, 0.0));
        step(&mut [&mut a], 2);
        assert!(a.session.player(1).unwrap().entity.is_invincible);

        // Second request inside the window never goes out.
        a.session.request_damage(1, 10, Vector3::new(1.0, 0.0, 0.0));
        step(&mut [&mut a], 2);

        assert_eq!(a.health.0.borrow().len(), 1);
        assert_eq!(a.health.0.borrow()[0], (1, -10));
    }

    #[test]
    fn test_thrown_item_impact_damages_once() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 5);
        a.session.spawn_player(0);
        a.session.spawn_player(0);
        step(&mut [&mut a], 30);

        // An item flying straight at the second player, launched high enough
        // to cross the gap before gravity grounds it.
        let item = a
            .session
            .spawn_item(Vector3::new(0.0, 1.2, -2.0), 0);
        {
            // Arm it as if thrown by actor 0.
            let call = RemoteCall::Throw {
                carryable: item,
                carrier: 0,
                power: 12.0,
                position: [0.0, 1.2, -2.0],
                yaw: 0.0,
            };
            a.session.apply_remote_call(call);
        }

        step(&mut [&mut a], 40);

        let hits: Vec<_> = a
            .health
            .0
            .borrow()
            .iter()
            .filter(|(actor, _)| *actor == 1)
            .copied()
            .collect();
        assert_eq!(hits.len(), 1, "impact damage must apply exactly once");
        assert!(!a.session.carryable(item).unwrap().is_thrown);
        assert!(a.session.player(1).unwrap().entity.is_invincible);
    }

    #[test]
    fn test_invincibility_expires_and_clears_ignores() {
        let hub = LoopbackHub::new();
        let mut a = make_peer(&hub, 0, 5);
        a.session.spawn_player(0);
        step(&mut [&mut a], 5);

        a.session.request_damage(0, 5, Vector3::new(0.0, 0.0, 1.0));
        step(&mut [&mut a], 2);
        assert!(a.session.player(0).unwrap().entity.is_invincible);
        a.session
            .player_mut(0)
            .unwrap()
            .controller
            .ignored_colliders
            .push(999);

        let window = ticks(GameConfig::default().combat.invincibility_length) as usize;
        step(&mut [&mut a], window + 2);

        let slot = a.session.player(0).unwrap();
        assert!(!slot.entity.is_invincible);
        assert!(slot.controller.ignored_colliders.is_empty());
        assert!(slot.entity.visible);
    }
}
