//! Character controller state machine.
//!
//! Computes the character's velocity and rotation every physics tick from the
//! current input snapshot and the motor's grounding report, and manages the
//! jump / crouch / charge transitions. Runs only on the peer that owns the
//! character; remote copies replicate the resulting transform instead.

use nalgebra::{UnitQuaternion, Vector3};

use crate::collision::ColliderId;
use crate::config::MovementTuning;
use crate::input::{InputState, OrientationMethod};
use crate::motor::{CharacterBehavior, GroundingReport, MotorContext, MovementHit};
use crate::util::{
    EPSILON, clamp_magnitude, from_to_rotation, look_rotation, planar_direction, project_on_axis,
    project_on_plane, slerp_direction, smoothing, yaw_rotation,
};

/// Movement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharacterState {
    #[default]
    Default,
    Charging,
}

/// Up-vector correction applied after facing interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BonusOrientationMethod {
    #[default]
    None,
    TowardsGravity,
    TowardsGroundSlopeAndGravity,
}

/// Edge-triggered notifications produced by the grounding transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    Landed,
    LeftStableGround,
}

/// The controller. One instance per character, owned by its authoritative
/// peer.
pub struct CharacterController {
    tuning: MovementTuning,
    state: CharacterState,
    pub orientation_method: OrientationMethod,
    pub bonus_orientation_method: BonusOrientationMethod,
    /// Polled each tick; zeroes movement while set.
    pub restrict_movement: bool,
    /// Polled each tick; cancels all velocity along the character up axis.
    pub defy_gravity: bool,
    /// Colliders the motor must pass through (the carried object, during
    /// carry and shortly after a throw).
    pub ignored_colliders: Vec<ColliderId>,

    gravity: Vector3<f32>,
    move_input_vector: Vector3<f32>,
    look_input_vector: Vector3<f32>,

    jump_requested: bool,
    jump_consumed: bool,
    jumped_this_tick: bool,
    can_wall_jump: bool,
    wall_jump_normal: Vector3<f32>,
    time_since_jump_requested: f32,
    time_since_last_able_to_jump: f32,
    internal_velocity_add: Vector3<f32>,

    should_be_crouching: bool,
    is_crouching: bool,

    target_position: Vector3<f32>,
    charge_speed: f32,
    max_charge_time: f32,
    charge_velocity: Vector3<f32>,
    charge_stopped: bool,
    time_since_charge_start: f32,
    time_since_stopped: f32,

    cached_up: Vector3<f32>,
    events: Vec<ControllerEvent>,
}

impl CharacterController {
    pub fn new(tuning: MovementTuning) -> Self {
        let gravity = Vector3::from(tuning.gravity);
        let charge_speed = tuning.charge_speed;
        let max_charge_time = tuning.max_charge_time;
        Self {
            tuning,
            state: CharacterState::Default,
            orientation_method: OrientationMethod::default(),
            bonus_orientation_method: BonusOrientationMethod::default(),
            restrict_movement: false,
            defy_gravity: false,
            ignored_colliders: Vec::new(),
            gravity,
            move_input_vector: Vector3::zeros(),
            look_input_vector: Vector3::zeros(),
            jump_requested: false,
            jump_consumed: false,
            jumped_this_tick: false,
            can_wall_jump: false,
            wall_jump_normal: Vector3::zeros(),
            time_since_jump_requested: f32::INFINITY,
            time_since_last_able_to_jump: 0.0,
            internal_velocity_add: Vector3::zeros(),
            should_be_crouching: false,
            is_crouching: false,
            target_position: Vector3::zeros(),
            charge_speed,
            max_charge_time,
            charge_velocity: Vector3::zeros(),
            charge_stopped: false,
            time_since_charge_start: 0.0,
            time_since_stopped: 0.0,
            cached_up: Vector3::y(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> CharacterState {
        self.state
    }

    pub fn is_crouching(&self) -> bool {
        self.is_crouching
    }

    pub fn jump_consumed(&self) -> bool {
        self.jump_consumed
    }

    pub fn can_wall_jump(&self) -> bool {
        self.can_wall_jump
    }

    /// Normal of the wall recorded for the current wall-jump window.
    pub fn wall_jump_normal(&self) -> Vector3<f32> {
        self.wall_jump_normal
    }

    /// Drains the edge-triggered events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Feeds the per-frame input snapshot into the per-tick intent vectors.
    pub fn set_inputs(&mut self, input: &InputState) {
        let mut move_input = Vector3::new(input.move_axis.x, 0.0, input.move_axis.y);
        move_input = clamp_magnitude(&move_input, 1.0);
        if self.restrict_movement {
            move_input = Vector3::zeros();
        }

        let up = self.cached_up;
        let camera_rotation = yaw_rotation(input.camera_yaw);
        let camera_planar = planar_direction(&(camera_rotation * Vector3::z()), &up)
            .or_else(|| planar_direction(&(camera_rotation * Vector3::y()), &up))
            .unwrap_or_else(Vector3::z);
        let camera_planar_rotation = look_rotation(&camera_planar, &up);

        if self.state == CharacterState::Default {
            self.move_input_vector = camera_planar_rotation * move_input;

            self.look_input_vector = match self.orientation_method {
                OrientationMethod::TowardsCamera => camera_planar,
                OrientationMethod::TowardsMovement => self
                    .move_input_vector
                    .try_normalize(EPSILON)
                    .unwrap_or_else(Vector3::zeros),
            };

            if input.jump_held {
                self.time_since_jump_requested = 0.0;
                self.jump_requested = true;
            }

            self.should_be_crouching = input.crouch_held;
        }
    }

    /// Puts the character into the charge state aimed at a destination.
    pub fn dash_to_target(
        &mut self,
        destination: Vector3<f32>,
        seconds_to_target: f32,
        charge_speed: f32,
        current_position: Vector3<f32>,
    ) {
        self.target_position = destination;
        self.max_charge_time = seconds_to_target;
        self.charge_speed = charge_speed;
        self.transition_to_state(CharacterState::Charging, current_position);
    }

    /// Restrains a character while it is being carried: no input motion, no
    /// gravity. The caller also zeroes the motor velocity.
    pub fn pull_and_drop(&mut self) {
        self.defy_gravity = true;
        self.restrict_movement = true;
    }

    /// Undoes [`Self::pull_and_drop`] once the character is back in play.
    pub fn release_restraints(&mut self) {
        self.defy_gravity = false;
        self.restrict_movement = false;
    }

    /// Queues a velocity impulse, applied on the next velocity update.
    pub fn add_velocity(&mut self, velocity: Vector3<f32>) {
        if self.state == CharacterState::Default {
            self.internal_velocity_add += velocity;
        }
    }

    /// Runs the exit hook of the old state and the entry hook of the new one.
    pub fn transition_to_state(&mut self, new_state: CharacterState, position: Vector3<f32>) {
        let old_state = self.state;
        self.on_state_exit(old_state, new_state);
        self.state = new_state;
        self.on_state_enter(new_state, old_state, position);
        tracing::debug!("[controller] state {old_state:?} -> {new_state:?}");
    }

    fn on_state_enter(
        &mut self,
        state: CharacterState,
        _from: CharacterState,
        position: Vector3<f32>,
    ) {
        match state {
            CharacterState::Default => {}
            CharacterState::Charging => {
                self.charge_velocity = (self.target_position - position)
                    .try_normalize(EPSILON)
                    .unwrap_or_else(Vector3::zeros)
                    * self.charge_speed;
                self.charge_stopped = false;
                self.time_since_charge_start = 0.0;
                self.time_since_stopped = 0.0;
            }
        }
    }

    fn on_state_exit(&mut self, _state: CharacterState, _to: CharacterState) {}
}

impl CharacterBehavior for CharacterController {
    fn before_update(&mut self, ctx: &mut MotorContext<'_>, dt: f32) {
        self.cached_up = ctx.character_up();
        match self.state {
            CharacterState::Default => {}
            CharacterState::Charging => {
                self.time_since_charge_start += dt;
                if self.charge_stopped {
                    self.time_since_stopped += dt;
                }
            }
        }
    }

    fn update_velocity(
        &mut self,
        velocity: &mut Vector3<f32>,
        ctx: &mut MotorContext<'_>,
        dt: f32,
    ) {
        match self.state {
            CharacterState::Default => {
                if ctx.grounding().is_stable_on_ground {
                    // Ground movement.
                    let current_magnitude = velocity.norm();

                    let mut effective_normal = ctx.grounding().ground_normal;
                    if current_magnitude > 0.0 && ctx.grounding().snapping_prevented {
                        // Take the normal from the side we're coming from, so
                        // the velocity doesn't pop at ground transitions.
                        let ground_point_to_character =
                            ctx.position() - ctx.grounding().ground_point;
                        effective_normal = if velocity.dot(&ground_point_to_character) >= 0.0 {
                            ctx.grounding().outer_ground_normal
                        } else {
                            ctx.grounding().inner_ground_normal
                        };
                    }

                    // Reorient velocity on the slope.
                    *velocity = ctx.direction_tangent_to_surface(velocity, &effective_normal)
                        * current_magnitude;

                    // Target velocity from reoriented input.
                    let input_right = self.move_input_vector.cross(&ctx.character_up());
                    let reoriented_input = effective_normal
                        .cross(&input_right)
                        .try_normalize(EPSILON)
                        .unwrap_or_else(Vector3::zeros)
                        * self.move_input_vector.norm();
                    let max_speed = if self.is_crouching {
                        self.tuning.max_crouch_move_speed
                    } else {
                        self.tuning.max_stable_move_speed
                    };
                    let target = reoriented_input * max_speed;

                    *velocity = velocity.lerp(
                        &target,
                        smoothing(self.tuning.stable_movement_sharpness, dt),
                    );
                } else {
                    // Air movement.
                    if self.move_input_vector.norm_squared() > 0.0 {
                        let mut added =
                            self.move_input_vector * self.tuning.air_acceleration_speed * dt;

                        let velocity_on_plane = project_on_plane(velocity, &ctx.character_up());

                        if velocity_on_plane.norm() < self.tuning.max_air_move_speed {
                            // Clamp so the total on the input plane never
                            // exceeds the max air speed.
                            let new_total = clamp_magnitude(
                                &(velocity_on_plane + added),
                                self.tuning.max_air_move_speed,
                            );
                            added = new_total - velocity_on_plane;
                        } else if velocity_on_plane.dot(&added) > 0.0 {
                            // Already past the cap: keep the excess, block
                            // additions along it.
                            added = project_on_plane(
                                &added,
                                &velocity_on_plane.normalize(),
                            );
                        }

                        // Prevent air-climbing sloped walls.
                        if ctx.grounding().found_any_ground
                            && (*velocity + added).dot(&added) > 0.0
                        {
                            let up = ctx.character_up();
                            if let Some(obstruction_normal) = up
                                .cross(&ctx.grounding().ground_normal)
                                .cross(&up)
                                .try_normalize(EPSILON)
                            {
                                added = project_on_plane(&added, &obstruction_normal);
                            }
                        }

                        *velocity += added;
                    }

                    // Gravity.
                    *velocity += self.gravity * dt;

                    // Drag.
                    *velocity *= 1.0 / (1.0 + self.tuning.drag * dt);
                }

                // Jumping.
                self.jumped_this_tick = false;
                self.time_since_jump_requested += dt;
                if self.jump_requested {
                    let grounded_for_jump = if self.tuning.allow_jumping_when_sliding {
                        ctx.grounding().found_any_ground
                    } else {
                        ctx.grounding().is_stable_on_ground
                    };
                    if !self.jump_consumed
                        && (grounded_for_jump
                            || self.time_since_last_able_to_jump
                                <= self.tuning.jump_post_grounding_grace)
                    {
                        // Jump along the ground normal when perched on an
                        // unstable surface.
                        let mut jump_direction = ctx.character_up();
                        if ctx.grounding().found_any_ground
                            && !ctx.grounding().is_stable_on_ground
                        {
                            jump_direction = ctx.grounding().ground_normal;
                        }

                        // Skip ground snapping for one tick, or the snap
                        // would glue the character back down.
                        ctx.force_unground();

                        // Replace only the up-axis component of velocity.
                        let vertical = project_on_axis(velocity, &ctx.character_up());
                        *velocity += jump_direction * self.tuning.jump_up_speed - vertical;
                        *velocity +=
                            self.move_input_vector * self.tuning.jump_scalable_forward_speed;

                        self.jump_requested = false;
                        self.jump_consumed = true;
                        self.jumped_this_tick = true;
                    }
                }

                // External impulses.
                if self.internal_velocity_add.norm_squared() > 0.0 {
                    *velocity += self.internal_velocity_add;
                    self.internal_velocity_add = Vector3::zeros();
                }

                if self.restrict_movement {
                    *velocity = Vector3::zeros();
                }
            }
            CharacterState::Charging => {
                if !self.charge_stopped {
                    *velocity = self.charge_velocity;
                }
                *velocity += self.gravity * dt;
                *velocity *= 1.0 / (1.0 + self.tuning.drag * dt);
            }
        }

        if self.defy_gravity {
            *velocity = project_on_plane(velocity, &ctx.character_up());
        }
    }

    fn update_rotation(
        &mut self,
        rotation: &mut UnitQuaternion<f32>,
        ctx: &mut MotorContext<'_>,
        dt: f32,
    ) {
        if self.state != CharacterState::Default {
            return;
        }

        if self.look_input_vector.norm_squared() > 0.0 && self.tuning.orientation_sharpness > 0.0 {
            let smoothed = slerp_direction(
                &ctx.character_forward(),
                &self.look_input_vector,
                smoothing(self.tuning.orientation_sharpness, dt),
            );
            if let Some(direction) = smoothed.try_normalize(EPSILON) {
                *rotation = look_rotation(&direction, &ctx.character_up());
            }
        }

        let current_up = *rotation * Vector3::y();
        let bonus = smoothing(self.tuning.bonus_orientation_sharpness, dt);
        match self.bonus_orientation_method {
            BonusOrientationMethod::TowardsGravity => {
                let gravity_up = (-self.gravity).try_normalize(EPSILON).unwrap_or_else(Vector3::y);
                let target = slerp_direction(&current_up, &gravity_up, bonus);
                *rotation = from_to_rotation(&current_up, &target) * *rotation;
            }
            BonusOrientationMethod::TowardsGroundSlopeAndGravity => {
                if ctx.grounding().is_stable_on_ground {
                    let bottom_hemi_center =
                        ctx.position() + current_up * ctx.capsule_radius();

                    let smoothed_normal = slerp_direction(
                        &ctx.character_up(),
                        &ctx.grounding().ground_normal,
                        bonus,
                    );
                    *rotation = from_to_rotation(&current_up, &smoothed_normal) * *rotation;

                    // Pivot around the bottom hemisphere center so the
                    // rotation reads as turning about the feet.
                    ctx.set_transient_position(
                        bottom_hemi_center
                            + (*rotation * Vector3::new(0.0, -1.0, 0.0)) * ctx.capsule_radius(),
                    );
                } else {
                    let gravity_up =
                        (-self.gravity).try_normalize(EPSILON).unwrap_or_else(Vector3::y);
                    let target = slerp_direction(&current_up, &gravity_up, bonus);
                    *rotation = from_to_rotation(&current_up, &target) * *rotation;
                }
            }
            BonusOrientationMethod::None => {
                let target = slerp_direction(&current_up, &Vector3::y(), bonus);
                *rotation = from_to_rotation(&current_up, &target) * *rotation;
            }
        }
    }

    fn after_update(&mut self, ctx: &mut MotorContext<'_>, dt: f32) {
        match self.state {
            CharacterState::Default => {
                // Cancel jump requests older than the pre-grounding grace.
                if self.jump_requested
                    && self.time_since_jump_requested > self.tuning.jump_pre_grounding_grace
                {
                    self.jump_requested = false;
                }

                let grounded_for_jump = if self.tuning.allow_jumping_when_sliding {
                    ctx.grounding().found_any_ground
                } else {
                    ctx.grounding().is_stable_on_ground
                };
                if grounded_for_jump {
                    if !self.jumped_this_tick {
                        self.jump_consumed = false;
                    }
                    self.time_since_last_able_to_jump = 0.0;
                } else {
                    self.time_since_last_able_to_jump += dt;
                }

                // Crouch entry never needs a clearance test.
                if self.should_be_crouching && !self.is_crouching {
                    self.is_crouching = true;
                    ctx.set_capsule_dimensions(
                        self.tuning.capsule_radius,
                        self.tuning.crouched_height,
                    );
                }

                // Uncrouch only if the standing capsule fits.
                if self.is_crouching && !self.should_be_crouching {
                    let ignored = &self.ignored_colliders;
                    let blocked = ctx.character_overlap(
                        self.tuning.capsule_radius,
                        self.tuning.standing_height,
                        &|id| !ignored.contains(&id),
                    );
                    if !blocked {
                        self.is_crouching = false;
                        ctx.set_capsule_dimensions(
                            self.tuning.capsule_radius,
                            self.tuning.standing_height,
                        );
                    }
                }

                self.can_wall_jump = false;
            }
            CharacterState::Charging => {
                if !self.charge_stopped && self.time_since_charge_start > self.max_charge_time {
                    self.charge_stopped = true;
                }
                if self.time_since_stopped > self.tuning.stopped_time {
                    self.transition_to_state(CharacterState::Default, ctx.position());
                }
            }
        }
    }

    fn post_grounding_update(&mut self, ctx: &mut MotorContext<'_>, _dt: f32) {
        let stable = ctx.grounding().is_stable_on_ground;
        let was_stable = ctx.last_grounding().is_stable_on_ground;
        if stable && !was_stable {
            self.events.push(ControllerEvent::Landed);
        } else if !stable && was_stable {
            self.events.push(ControllerEvent::LeftStableGround);
        }
    }

    fn on_movement_hit(&mut self, hit: &MovementHit, grounding: &GroundingReport) {
        match self.state {
            CharacterState::Default => {
                // Wall-jump eligibility: airborne, pushing on an unstable
                // surface.
                if self.tuning.allow_wall_jump
                    && !grounding.is_stable_on_ground
                    && !hit.is_stable
                {
                    self.can_wall_jump = true;
                    self.wall_jump_normal = hit.normal;
                }
            }
            CharacterState::Charging => {
                if !self.charge_stopped && !hit.is_stable {
                    if let Some(charge_direction) = self.charge_velocity.try_normalize(EPSILON) {
                        if (-hit.normal).dot(&charge_direction) > 0.5 {
                            self.charge_stopped = true;
                        }
                    }
                }
            }
        }
    }

    fn is_collider_valid(&self, collider: ColliderId) -> bool {
        !self.ignored_colliders.contains(&collider)
    }
}
