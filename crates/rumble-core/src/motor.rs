//! Kinematic character motor.
//!
//! The motor owns a capsule's transient position/rotation and base velocity,
//! integrates movement against the collision world with an iterative sweep &
//! slide, probes for ground, and drives a [`CharacterBehavior`] through the
//! fixed callback sequence once per physics tick:
//!
//! before-update → velocity-update → rotation-update → (integrate) →
//! (ground probe) → after-update → post-grounding-update
//!
//! Velocity and rotation are only ever written inside their callbacks; the
//! same input sequence therefore replays to the same trajectory on every
//! peer.
//!
//! `transient_position` anchors the capsule's bottom tip (the feet).

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use parry3d::shape::Capsule;

use crate::collision::{ColliderId, CollisionWorld};
use crate::error::ConfigError;
use crate::util::project_on_plane;

/// Gap kept between the capsule and any obstruction.
pub const SKIN_WIDTH: f32 = 0.02;
/// Ground detection reach when airborne last tick.
const GROUND_PROBE_DISTANCE: f32 = 0.06;
/// Ground snap reach when stably grounded last tick.
const GROUND_SNAP_DISTANCE: f32 = 0.3;
const MAX_SLIDE_ITERATIONS: usize = 4;
/// Cosine of the default maximum stable slope angle (60 degrees).
const DEFAULT_STABLE_GROUND_COS: f32 = 0.5;

/// Per-tick grounding report.
#[derive(Debug, Clone, Copy)]
pub struct GroundingReport {
    /// Any ground was found within probe reach, stable or not.
    pub found_any_ground: bool,
    /// The ground found is walkable (within the stable slope limit).
    pub is_stable_on_ground: bool,
    /// Ground snapping did not run this tick (forced unground, or the
    /// character is leaving the surface faster than the snap can follow).
    pub snapping_prevented: bool,
    pub ground_normal: Vector3<f32>,
    /// Normal on the side the character is moving into.
    pub inner_ground_normal: Vector3<f32>,
    /// Normal on the side the character is coming from.
    pub outer_ground_normal: Vector3<f32>,
    pub ground_point: Vector3<f32>,
}

impl Default for GroundingReport {
    fn default() -> Self {
        Self {
            found_any_ground: false,
            is_stable_on_ground: false,
            snapping_prevented: false,
            ground_normal: Vector3::y(),
            inner_ground_normal: Vector3::y(),
            outer_ground_normal: Vector3::y(),
            ground_point: Vector3::zeros(),
        }
    }
}

/// A collision encountered while moving or probing.
#[derive(Debug, Clone, Copy)]
pub struct MovementHit {
    pub collider: ColliderId,
    pub normal: Vector3<f32>,
    pub point: Vector3<f32>,
    /// The surface is within the stable slope limit.
    pub is_stable: bool,
}

/// What the motor exposes to a behavior during a callback, plus the effects
/// the behavior may request. Effects are applied by the motor when the
/// callback returns.
pub struct MotorContext<'w> {
    grounding: GroundingReport,
    last_grounding: GroundingReport,
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
    capsule_radius: f32,
    capsule_height: f32,
    world: &'w CollisionWorld,
    unground_requested: bool,
    position_override: Option<Vector3<f32>>,
    capsule_override: Option<(f32, f32)>,
}

impl MotorContext<'_> {
    pub fn grounding(&self) -> &GroundingReport {
        &self.grounding
    }

    pub fn last_grounding(&self) -> &GroundingReport {
        &self.last_grounding
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.rotation
    }

    pub fn capsule_radius(&self) -> f32 {
        self.capsule_radius
    }

    pub fn capsule_height(&self) -> f32 {
        self.capsule_height
    }

    pub fn character_up(&self) -> Vector3<f32> {
        self.rotation * Vector3::y()
    }

    pub fn character_forward(&self) -> Vector3<f32> {
        self.rotation * Vector3::z()
    }

    /// Skip ground probing and snapping on this tick's probe.
    pub fn force_unground(&mut self) {
        self.unground_requested = true;
    }

    /// Move the capsule without sweeping (rotation pivot adjustments).
    pub fn set_transient_position(&mut self, position: Vector3<f32>) {
        self.position_override = Some(position);
    }

    /// Resize the capsule (crouch / stand).
    pub fn set_capsule_dimensions(&mut self, radius: f32, height: f32) {
        self.capsule_override = Some((radius, height));
    }

    /// Overlap test at the current pose with explicit capsule dimensions.
    pub fn character_overlap(
        &self,
        radius: f32,
        height: f32,
        filter: &dyn Fn(ColliderId) -> bool,
    ) -> bool {
        let capsule = capsule_shape(radius, height);
        let pose = capsule_pose(self.position, self.rotation, height);
        self.world.overlap_capsule(&capsule, &pose, filter)
    }

    /// Reorients `direction` so it runs tangent to a surface, preserving its
    /// heading relative to the character.
    pub fn direction_tangent_to_surface(
        &self,
        direction: &Vector3<f32>,
        surface_normal: &Vector3<f32>,
    ) -> Vector3<f32> {
        let right = direction.cross(&self.character_up());
        surface_normal
            .cross(&right)
            .try_normalize(crate::util::EPSILON)
            .unwrap_or_else(|| *direction)
    }
}

/// Callbacks a simulated object implements to steer its motor.
///
/// Defaults are no-ops; simple objects (a thrown carryable) only override the
/// velocity update.
pub trait CharacterBehavior {
    fn before_update(&mut self, _ctx: &mut MotorContext<'_>, _dt: f32) {}

    fn update_velocity(&mut self, velocity: &mut Vector3<f32>, ctx: &mut MotorContext<'_>, dt: f32);

    fn update_rotation(
        &mut self,
        _rotation: &mut UnitQuaternion<f32>,
        _ctx: &mut MotorContext<'_>,
        _dt: f32,
    ) {
    }

    fn after_update(&mut self, _ctx: &mut MotorContext<'_>, _dt: f32) {}

    fn post_grounding_update(&mut self, _ctx: &mut MotorContext<'_>, _dt: f32) {}

    fn on_movement_hit(&mut self, _hit: &MovementHit, _grounding: &GroundingReport) {}

    fn on_ground_hit(&mut self, _hit: &MovementHit, _grounding: &GroundingReport) {}

    fn is_collider_valid(&self, _collider: ColliderId) -> bool {
        true
    }
}

/// The kinematic motor for one capsule.
pub struct KinematicMotor {
    pub transient_position: Vector3<f32>,
    pub transient_rotation: UnitQuaternion<f32>,
    pub base_velocity: Vector3<f32>,
    pub grounding: GroundingReport,
    pub last_grounding: GroundingReport,
    /// Disabled motors hold their transform; remote copies and carried
    /// objects are driven externally.
    pub enabled: bool,
    capsule_radius: f32,
    capsule_height: f32,
    stable_ground_cos: f32,
    must_unground: bool,
    tick_movement_normal: Option<Vector3<f32>>,
}

impl KinematicMotor {
    pub fn new(position: Vector3<f32>, radius: f32, height: f32) -> Result<Self, ConfigError> {
        if radius <= 0.0 || height < 2.0 * radius {
            return Err(ConfigError::InvalidCapsule { radius, height });
        }
        Ok(Self {
            transient_position: position,
            transient_rotation: UnitQuaternion::identity(),
            base_velocity: Vector3::zeros(),
            grounding: GroundingReport::default(),
            last_grounding: GroundingReport::default(),
            enabled: true,
            capsule_radius: radius,
            capsule_height: height,
            stable_ground_cos: DEFAULT_STABLE_GROUND_COS,
            must_unground: false,
            tick_movement_normal: None,
        })
    }

    pub fn capsule_radius(&self) -> f32 {
        self.capsule_radius
    }

    pub fn capsule_height(&self) -> f32 {
        self.capsule_height
    }

    pub fn character_up(&self) -> Vector3<f32> {
        self.transient_rotation * Vector3::y()
    }

    pub fn character_forward(&self) -> Vector3<f32> {
        self.transient_rotation * Vector3::z()
    }

    pub fn set_position(&mut self, position: Vector3<f32>) {
        self.transient_position = position;
    }

    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.transient_rotation = rotation;
    }

    pub fn set_position_and_rotation(
        &mut self,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
    ) {
        self.transient_position = position;
        self.transient_rotation = rotation;
    }

    pub fn set_capsule_dimensions(&mut self, radius: f32, height: f32) {
        debug_assert!(radius > 0.0 && height >= 2.0 * radius);
        self.capsule_radius = radius;
        self.capsule_height = height;
    }

    /// Skip ground probing and snapping on the next probe.
    pub fn force_unground(&mut self) {
        self.must_unground = true;
    }

    /// World-space capsule pose at the current transform.
    pub fn capsule_pose(&self) -> (Capsule, Isometry3<f32>) {
        (
            capsule_shape(self.capsule_radius, self.capsule_height),
            capsule_pose(
                self.transient_position,
                self.transient_rotation,
                self.capsule_height,
            ),
        )
    }

    /// Runs one full motor tick, driving the behavior through the callback
    /// sequence and integrating the resulting velocity.
    pub fn update<B: CharacterBehavior>(
        &mut self,
        world: &CollisionWorld,
        behavior: &mut B,
        dt: f32,
    ) {
        if !self.enabled {
            return;
        }
        self.last_grounding = self.grounding;
        self.tick_movement_normal = None;

        let mut ctx = self.context(world);
        behavior.before_update(&mut ctx, dt);
        self.apply_effects(ctx);

        let mut velocity = self.base_velocity;
        let mut ctx = self.context(world);
        behavior.update_velocity(&mut velocity, &mut ctx, dt);
        self.base_velocity = velocity;
        self.apply_effects(ctx);

        let mut rotation = self.transient_rotation;
        let mut ctx = self.context(world);
        behavior.update_rotation(&mut rotation, &mut ctx, dt);
        self.transient_rotation = rotation;
        self.apply_effects(ctx);

        self.integrate(world, behavior, dt);
        self.probe_ground(world, behavior);

        let mut ctx = self.context(world);
        behavior.after_update(&mut ctx, dt);
        self.apply_effects(ctx);

        let mut ctx = self.context(world);
        behavior.post_grounding_update(&mut ctx, dt);
        self.apply_effects(ctx);
    }

    fn context<'w>(&self, world: &'w CollisionWorld) -> MotorContext<'w> {
        MotorContext {
            grounding: self.grounding,
            last_grounding: self.last_grounding,
            position: self.transient_position,
            rotation: self.transient_rotation,
            capsule_radius: self.capsule_radius,
            capsule_height: self.capsule_height,
            world,
            unground_requested: false,
            position_override: None,
            capsule_override: None,
        }
    }

    fn apply_effects(&mut self, ctx: MotorContext<'_>) {
        if ctx.unground_requested {
            self.must_unground = true;
        }
        if let Some(position) = ctx.position_override {
            self.transient_position = position;
        }
        if let Some((radius, height)) = ctx.capsule_override {
            self.set_capsule_dimensions(radius, height);
        }
    }

    /// Iterative sweep & slide along the current base velocity.
    fn integrate<B: CharacterBehavior>(
        &mut self,
        world: &CollisionWorld,
        behavior: &mut B,
        dt: f32,
    ) {
        let mut remaining = self.base_velocity * dt;

        for _ in 0..MAX_SLIDE_ITERATIONS {
            let distance = remaining.norm();
            if distance <= crate::util::EPSILON {
                break;
            }
            let dir = remaining / distance;
            let (capsule, pose) = self.capsule_pose();

            let hit = {
                let filter_source: &B = behavior;
                let filter = |id: ColliderId| filter_source.is_collider_valid(id);
                world.cast_capsule(&capsule, &pose, &dir, distance + SKIN_WIDTH, &filter)
            };

            let Some(hit) = hit else {
                self.transient_position += remaining;
                break;
            };

            let travel = (hit.distance - SKIN_WIDTH).max(0.0);
            self.transient_position += dir * travel;

            let is_stable = hit.normal.dot(&self.character_up()) >= self.stable_ground_cos;
            self.tick_movement_normal = Some(hit.normal);
            behavior.on_movement_hit(
                &MovementHit {
                    collider: hit.collider,
                    normal: hit.normal,
                    point: hit.point,
                    is_stable,
                },
                &self.grounding,
            );

            remaining = project_on_plane(&(dir * (distance - travel)), &hit.normal);
            self.base_velocity = project_on_plane(&self.base_velocity, &hit.normal);
        }
    }

    /// Probes for ground below the feet and snaps onto stable surfaces.
    fn probe_ground<B: CharacterBehavior>(&mut self, world: &CollisionWorld, behavior: &mut B) {
        let mut report = GroundingReport::default();

        if self.must_unground {
            self.must_unground = false;
            report.snapping_prevented = true;
            self.grounding = report;
            return;
        }

        let up = self.character_up();
        let reach = SKIN_WIDTH
            + if self.last_grounding.is_stable_on_ground {
                GROUND_SNAP_DISTANCE
            } else {
                GROUND_PROBE_DISTANCE
            };
        let (capsule, pose) = self.capsule_pose();

        let hit = {
            let filter_source: &B = behavior;
            let filter = |id: ColliderId| filter_source.is_collider_valid(id);
            world.cast_capsule(&capsule, &pose, &-up, reach, &filter)
        };

        if let Some(hit) = hit {
            report.found_any_ground = true;
            report.ground_normal = hit.normal;
            report.ground_point = hit.point;
            report.outer_ground_normal = hit.normal;
            report.inner_ground_normal = self.tick_movement_normal.unwrap_or(hit.normal);
            report.is_stable_on_ground = hit.normal.dot(&up) >= self.stable_ground_cos;

            if report.is_stable_on_ground {
                let snap = hit.distance - SKIN_WIDTH;
                if snap > 0.0 {
                    self.transient_position -= up * snap;
                }
                if self.base_velocity.dot(&hit.normal) > 0.05 {
                    report.snapping_prevented = true;
                }
                behavior.on_ground_hit(
                    &MovementHit {
                        collider: hit.collider,
                        normal: hit.normal,
                        point: hit.point,
                        is_stable: true,
                    },
                    &self.grounding,
                );
            }
        }

        self.grounding = report;
    }
}

fn capsule_shape(radius: f32, height: f32) -> Capsule {
    Capsule::new_y((height / 2.0 - radius).max(crate::util::EPSILON), radius)
}

fn capsule_pose(
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
    height: f32,
) -> Isometry3<f32> {
    let center = position + rotation * Vector3::new(0.0, height / 2.0, 0.0);
    Isometry3::from_parts(Translation3::from(center), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gravity-only behavior, the simplest motor client.
    struct FallingBody {
        gravity: Vector3<f32>,
    }

    impl FallingBody {
        fn new() -> Self {
            Self {
                gravity: Vector3::new(0.0, -30.0, 0.0),
            }
        }
    }

    impl CharacterBehavior for FallingBody {
        fn update_velocity(
            &mut self,
            velocity: &mut Vector3<f32>,
            _ctx: &mut MotorContext<'_>,
            dt: f32,
        ) {
            *velocity += self.gravity * dt;
        }
    }

    const DT: f32 = 1.0 / 60.0;

    fn flat_world() -> CollisionWorld {
        let mut world = CollisionWorld::new();
        world.add_box(
            Vector3::new(0.0, -0.5, 0.0),
            Vector3::new(100.0, 0.5, 100.0),
        );
        world
    }

    fn motor_at(y: f32) -> KinematicMotor {
        KinematicMotor::new(Vector3::new(0.0, y, 0.0), 0.5, 2.0).expect("motor")
    }

    #[test]
    fn test_invalid_capsule_is_fatal() {
        assert!(KinematicMotor::new(Vector3::zeros(), 0.5, 0.4).is_err());
        assert!(KinematicMotor::new(Vector3::zeros(), -1.0, 2.0).is_err());
    }

    #[test]
    fn test_falls_and_lands() {
        let world = flat_world();
        let mut motor = motor_at(3.0);
        let mut body = FallingBody::new();

        for _ in 0..120 {
            motor.update(&world, &mut body, DT);
        }

        assert!(motor.grounding.is_stable_on_ground);
        // Feet rest just above the floor surface at y=0.
        assert!(motor.transient_position.y.abs() < 0.1);
        // Impact velocity was clipped against the floor.
        assert!(motor.base_velocity.y.abs() < 1.0);
    }

    #[test]
    fn test_grounding_edge_is_single_tick() {
        let world = flat_world();
        let mut motor = motor_at(1.0);
        let mut body = FallingBody::new();

        let mut landing_edges = 0;
        for _ in 0..120 {
            motor.update(&world, &mut body, DT);
            if motor.grounding.is_stable_on_ground && !motor.last_grounding.is_stable_on_ground {
                landing_edges += 1;
            }
        }
        assert_eq!(landing_edges, 1);
    }

    #[test]
    fn test_wall_stops_horizontal_motion() {
        let mut world = flat_world();
        world.add_box(Vector3::new(3.0, 2.0, 0.0), Vector3::new(0.5, 2.0, 10.0));

        let mut motor = motor_at(0.1);
        let mut body = FallingBody::new();
        motor.base_velocity = Vector3::new(20.0, 0.0, 0.0);

        for _ in 0..60 {
            motor.update(&world, &mut body, DT);
        }

        // Stopped at the wall face (x = 2.5) minus capsule radius and skin.
        assert!(motor.transient_position.x < 2.5 - 0.4);
        assert!(motor.base_velocity.x.abs() < 0.1);
    }

    #[test]
    fn test_slide_preserves_tangential_motion() {
        let mut world = flat_world();
        world.add_box(Vector3::new(3.0, 2.0, 0.0), Vector3::new(0.5, 2.0, 10.0));

        let mut motor = motor_at(0.1);
        let mut body = FallingBody::new();
        // Velocity angled into the wall: x is blocked, z keeps going.
        motor.base_velocity = Vector3::new(10.0, 0.0, 10.0);

        for _ in 0..60 {
            motor.update(&world, &mut body, DT);
        }

        assert!(motor.transient_position.z > 2.0);
        assert!(motor.base_velocity.z > 5.0);
    }

    #[test]
    fn test_force_unground_skips_snap() {
        let world = flat_world();
        let mut motor = motor_at(1.0);
        let mut body = FallingBody::new();

        for _ in 0..60 {
            motor.update(&world, &mut body, DT);
        }
        assert!(motor.grounding.is_stable_on_ground);

        motor.force_unground();
        motor.base_velocity = Vector3::new(0.0, 10.0, 0.0);
        motor.update(&world, &mut body, DT);

        assert!(!motor.grounding.is_stable_on_ground);
        assert!(motor.grounding.snapping_prevented);
        assert!(motor.transient_position.y > 0.05);
    }

    #[test]
    fn test_disabled_motor_holds_transform() {
        let world = flat_world();
        let mut motor = motor_at(5.0);
        let mut body = FallingBody::new();
        motor.enabled = false;

        motor.update(&world, &mut body, DT);
        assert!((motor.transient_position.y - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ignored_collider_is_passed_through() {
        struct IgnoringBody {
            inner: FallingBody,
            ignored: ColliderId,
        }
        impl CharacterBehavior for IgnoringBody {
            fn update_velocity(
                &mut self,
                velocity: &mut Vector3<f32>,
                ctx: &mut MotorContext<'_>,
                dt: f32,
            ) {
                self.inner.update_velocity(velocity, ctx, dt);
            }
            fn is_collider_valid(&self, collider: ColliderId) -> bool {
                collider != self.ignored
            }
        }

        let mut world = CollisionWorld::new();
        let floor = world.add_box(
            Vector3::new(0.0, -0.5, 0.0),
            Vector3::new(100.0, 0.5, 100.0),
        );

        let mut motor = motor_at(1.0);
        let mut body = IgnoringBody {
            inner: FallingBody::new(),
            ignored: floor,
        };

        for _ in 0..60 {
            motor.update(&world, &mut body, DT);
        }

        // The only floor is ignored, so the body falls straight through.
        assert!(motor.transient_position.y < -1.0);
        assert!(!motor.grounding.found_any_ground);
    }
}
