//! Small vector and rotation helpers used across the movement core.
//!
//! All helpers tolerate zero-length inputs; nothing here panics on degenerate
//! geometry.

use nalgebra::{UnitQuaternion, Vector3};

/// Length below which a vector is treated as zero.
pub const EPSILON: f32 = 1.0e-6;

/// Exponential damping factor `1 - e^(-sharpness * dt)`.
pub fn smoothing(sharpness: f32, dt: f32) -> f32 {
    1.0 - (-sharpness * dt).exp()
}

/// Removes the component of `v` along the (normalized) `normal`.
pub fn project_on_plane(v: &Vector3<f32>, normal: &Vector3<f32>) -> Vector3<f32> {
    v - normal * v.dot(normal)
}

/// Component of `v` along the (normalized) `axis`.
pub fn project_on_axis(v: &Vector3<f32>, axis: &Vector3<f32>) -> Vector3<f32> {
    axis * v.dot(axis)
}

/// Clamps `v` to at most `max` length, preserving direction.
pub fn clamp_magnitude(v: &Vector3<f32>, max: f32) -> Vector3<f32> {
    let norm_sq = v.norm_squared();
    if norm_sq > max * max {
        v * (max / norm_sq.sqrt())
    } else {
        *v
    }
}

/// Spherically interpolates between two directions by factor `t`.
///
/// Falls back to linear blending when the directions are opposed (the
/// rotation between them is ambiguous).
pub fn slerp_direction(from: &Vector3<f32>, to: &Vector3<f32>, t: f32) -> Vector3<f32> {
    let (Some(from_n), Some(to_n)) = (from.try_normalize(EPSILON), to.try_normalize(EPSILON))
    else {
        return *from;
    };
    match UnitQuaternion::rotation_between(&from_n, &to_n) {
        Some(rotation) => (rotation.powf(t) * from_n) * from.norm(),
        None => {
            let blended = from_n.lerp(&to_n, t);
            blended.try_normalize(EPSILON).unwrap_or(to_n) * from.norm()
        }
    }
}

/// Rotation with its local Z axis pointing along `forward` and local Y as
/// close to `up` as possible.
pub fn look_rotation(forward: &Vector3<f32>, up: &Vector3<f32>) -> UnitQuaternion<f32> {
    if forward.norm_squared() < EPSILON * EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::face_towards(forward, up)
}

/// Shortest-arc rotation taking direction `from` to direction `to`.
pub fn from_to_rotation(from: &Vector3<f32>, to: &Vector3<f32>) -> UnitQuaternion<f32> {
    let (Some(from_n), Some(to_n)) = (from.try_normalize(EPSILON), to.try_normalize(EPSILON))
    else {
        return UnitQuaternion::identity();
    };
    UnitQuaternion::rotation_between(&from_n, &to_n).unwrap_or_else(|| {
        // Opposed directions: rotate half a turn about any perpendicular axis.
        let axis = orthogonal(&from_n);
        UnitQuaternion::from_axis_angle(
            &nalgebra::Unit::new_normalize(axis),
            std::f32::consts::PI,
        )
    })
}

/// Any vector perpendicular to `v`.
pub fn orthogonal(v: &Vector3<f32>) -> Vector3<f32> {
    let candidate = v.cross(&Vector3::y());
    if candidate.norm_squared() > EPSILON * EPSILON {
        candidate
    } else {
        v.cross(&Vector3::x())
    }
}

/// Projects `v` onto the plane normal to `up` and normalizes, if possible.
pub fn planar_direction(v: &Vector3<f32>, up: &Vector3<f32>) -> Option<Vector3<f32>> {
    project_on_plane(v, up).try_normalize(EPSILON)
}

/// Heading angle of a forward vector around the world Y axis.
pub fn yaw_of(forward: &Vector3<f32>) -> f32 {
    forward.x.atan2(forward.z)
}

/// Rotation of `yaw` radians around the world Y axis.
pub fn yaw_rotation(yaw: f32) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothing_bounds() {
        assert!(smoothing(10.0, 0.0).abs() < 1.0e-6);
        let f = smoothing(10.0, 1.0);
        assert!(f > 0.99 && f <= 1.0);
    }

    #[test]
    fn test_project_on_plane_removes_normal_component() {
        let v = Vector3::new(3.0, 4.0, 5.0);
        let n = Vector3::y();
        let projected = project_on_plane(&v, &n);
        assert!(projected.y.abs() < 1.0e-6);
        assert!((projected.x - 3.0).abs() < 1.0e-6);
    }

    #[test]
    fn test_clamp_magnitude() {
        let v = Vector3::new(3.0, 0.0, 4.0);
        let clamped = clamp_magnitude(&v, 2.5);
        assert!((clamped.norm() - 2.5).abs() < 1.0e-5);
        let untouched = clamp_magnitude(&v, 10.0);
        assert!((untouched - v).norm() < 1.0e-6);
    }

    #[test]
    fn test_slerp_direction_endpoints() {
        let from = Vector3::z();
        let to = Vector3::x();
        assert!((slerp_direction(&from, &to, 0.0) - from).norm() < 1.0e-5);
        assert!((slerp_direction(&from, &to, 1.0) - to).norm() < 1.0e-5);
    }

    #[test]
    fn test_slerp_direction_opposed_does_not_collapse() {
        let from = Vector3::z();
        let to = -Vector3::z();
        let mid = slerp_direction(&from, &to, 0.5);
        assert!((mid.norm() - 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn test_from_to_rotation_maps_direction() {
        let from = Vector3::z();
        let to = Vector3::x();
        let rotation = from_to_rotation(&from, &to);
        assert!((rotation * from - to).norm() < 1.0e-5);
    }

    #[test]
    fn test_from_to_rotation_opposed() {
        let from = Vector3::z();
        let to = -Vector3::z();
        let rotation = from_to_rotation(&from, &to);
        assert!((rotation * from - to).norm() < 1.0e-4);
    }

    #[test]
    fn test_yaw_roundtrip() {
        let yaw = 0.8;
        let forward = yaw_rotation(yaw) * Vector3::z();
        assert!((yaw_of(&forward) - yaw).abs() < 1.0e-5);
    }
}
