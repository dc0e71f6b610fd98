//! Static collision world queried by the kinematic motors.
//!
//! Holds the arena geometry plus the carryable colliders, each under a stable
//! id so controllers can keep ignore lists across ticks. Queries are built on
//! parry3d shape casts; colliders are iterated in insertion order so results
//! are deterministic across peers.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use parry3d::query::{self, ShapeCastOptions};
use parry3d::shape::{Capsule, Cuboid, SharedShape};

/// Stable identifier of a collider inside the world.
pub type ColliderId = u32;

/// One collider: a shape at a pose. Disabled colliders are skipped by every
/// query (a carried object's collider is disabled, not removed).
pub struct WorldCollider {
    pub id: ColliderId,
    pub shape: SharedShape,
    pub pose: Isometry3<f32>,
    pub enabled: bool,
}

/// Result of a capsule sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepHit {
    pub collider: ColliderId,
    /// Travel distance along the cast direction at impact.
    pub distance: f32,
    /// World-space surface normal at the contact, facing the cast shape.
    pub normal: Vector3<f32>,
    /// World-space contact point on the hit collider.
    pub point: Vector3<f32>,
}

/// The static collision world.
#[derive(Default)]
pub struct CollisionWorld {
    colliders: Vec<WorldCollider>,
    next_id: ColliderId,
}

impl CollisionWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an axis-aligned box collider and returns its id.
    pub fn add_box(&mut self, center: Vector3<f32>, half_extents: Vector3<f32>) -> ColliderId {
        self.add_shape(
            SharedShape::new(Cuboid::new(half_extents)),
            Isometry3::from_parts(Translation3::from(center), UnitQuaternion::identity()),
        )
    }

    /// Adds an arbitrary shape at a pose and returns its id.
    pub fn add_shape(&mut self, shape: SharedShape, pose: Isometry3<f32>) -> ColliderId {
        let id = self.next_id;
        self.next_id += 1;
        self.colliders.push(WorldCollider {
            id,
            shape,
            pose,
            enabled: true,
        });
        id
    }

    pub fn set_enabled(&mut self, id: ColliderId, enabled: bool) {
        if let Some(collider) = self.colliders.iter_mut().find(|c| c.id == id) {
            collider.enabled = enabled;
        }
    }

    pub fn set_pose(&mut self, id: ColliderId, pose: Isometry3<f32>) {
        if let Some(collider) = self.colliders.iter_mut().find(|c| c.id == id) {
            collider.pose = pose;
        }
    }

    pub fn collider(&self, id: ColliderId) -> Option<&WorldCollider> {
        self.colliders.iter().find(|c| c.id == id)
    }

    /// Sweeps a capsule along `dir` (normalized) by up to `max_distance` and
    /// returns the first hit among colliders accepted by `filter`.
    pub fn cast_capsule(
        &self,
        capsule: &Capsule,
        pose: &Isometry3<f32>,
        dir: &Vector3<f32>,
        max_distance: f32,
        filter: &dyn Fn(ColliderId) -> bool,
    ) -> Option<SweepHit> {
        let options = ShapeCastOptions {
            max_time_of_impact: max_distance,
            target_distance: 0.0,
            stop_at_penetration: true,
            compute_impact_geometry_on_penetration: true,
        };
        let zero = Vector3::zeros();
        let mut best: Option<SweepHit> = None;

        for collider in self.colliders.iter().filter(|c| c.enabled) {
            if !filter(collider.id) {
                continue;
            }
            let Ok(Some(hit)) = query::cast_shapes(
                pose,
                dir,
                capsule,
                &collider.pose,
                &zero,
                &*collider.shape,
                options,
            ) else {
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|b| hit.time_of_impact < b.distance)
            {
                let mut normal = collider.pose.rotation * hit.normal2.into_inner();
                if normal.dot(dir) > 0.0 {
                    normal = -normal;
                }
                best = Some(SweepHit {
                    collider: collider.id,
                    distance: hit.time_of_impact,
                    normal,
                    point: collider.pose.transform_point(&hit.witness2).coords,
                });
            }
        }
        best
    }

    /// Tests whether a capsule overlaps any collider accepted by `filter`.
    pub fn overlap_capsule(
        &self,
        capsule: &Capsule,
        pose: &Isometry3<f32>,
        filter: &dyn Fn(ColliderId) -> bool,
    ) -> bool {
        self.colliders
            .iter()
            .filter(|c| c.enabled && filter(c.id))
            .any(|c| {
                query::intersection_test(pose, capsule, &c.pose, &*c.shape).unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capsule() -> Capsule {
        // Total height 2.0: segment half-length 0.5, radius 0.5.
        Capsule::new_y(0.5, 0.5)
    }

    fn at(position: Vector3<f32>) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(position), UnitQuaternion::identity())
    }

    #[test]
    fn test_cast_down_hits_floor() {
        let mut world = CollisionWorld::new();
        world.add_box(Vector3::new(0.0, -0.5, 0.0), Vector3::new(50.0, 0.5, 50.0));

        // Capsule center at y=3 => bottom tip at y=2, floor surface at y=0.
        let hit = world
            .cast_capsule(
                &capsule(),
                &at(Vector3::new(0.0, 3.0, 0.0)),
                &-Vector3::y(),
                10.0,
                &|_| true,
            )
            .expect("floor hit");

        assert!((hit.distance - 2.0).abs() < 1.0e-3);
        assert!(hit.normal.y > 0.99);
    }

    #[test]
    fn test_cast_respects_max_distance() {
        let mut world = CollisionWorld::new();
        world.add_box(Vector3::new(0.0, -0.5, 0.0), Vector3::new(50.0, 0.5, 50.0));

        let hit = world.cast_capsule(
            &capsule(),
            &at(Vector3::new(0.0, 3.0, 0.0)),
            &-Vector3::y(),
            1.0,
            &|_| true,
        );
        assert!(hit.is_none());
    }

    #[test]
    fn test_filter_and_disable_skip_colliders() {
        let mut world = CollisionWorld::new();
        let floor = world.add_box(Vector3::new(0.0, -0.5, 0.0), Vector3::new(50.0, 0.5, 50.0));

        let pose = at(Vector3::new(0.0, 3.0, 0.0));
        let dir = -Vector3::y();

        assert!(
            world
                .cast_capsule(&capsule(), &pose, &dir, 10.0, &|id| id != floor)
                .is_none()
        );

        world.set_enabled(floor, false);
        assert!(
            world
                .cast_capsule(&capsule(), &pose, &dir, 10.0, &|_| true)
                .is_none()
        );
    }

    #[test]
    fn test_overlap_capsule() {
        let mut world = CollisionWorld::new();
        world.add_box(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));

        assert!(world.overlap_capsule(&capsule(), &at(Vector3::new(0.0, 1.0, 0.0)), &|_| true));
        assert!(!world.overlap_capsule(&capsule(), &at(Vector3::new(0.0, 5.0, 0.0)), &|_| true));
    }

    #[test]
    fn test_nearest_hit_wins() {
        let mut world = CollisionWorld::new();
        world.add_box(Vector3::new(0.0, -10.5, 0.0), Vector3::new(50.0, 0.5, 50.0));
        let near = world.add_box(Vector3::new(0.0, -0.5, 0.0), Vector3::new(50.0, 0.5, 50.0));

        let hit = world
            .cast_capsule(
                &capsule(),
                &at(Vector3::new(0.0, 3.0, 0.0)),
                &-Vector3::y(),
                30.0,
                &|_| true,
            )
            .expect("hit");
        assert_eq!(hit.collider, near);
    }
}
