//! Pose codec
//!
//! Converts between the quaternion-based [`CartesianPose`] used on the wire and
//! the robot's native 6-vector pose `[x, y, z, rx, ry, rz]`, where the last three
//! components are a rotation vector (unit axis scaled by angle in radians).

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rotation angles below this are treated as the identity orientation.
pub const ROTATION_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

/// Position in meters plus orientation as a quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianPose {
    pub position: Position,
    pub orientation: Orientation,
}

/// Robot-native pose: position followed by rotation vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativePose(pub [f64; 6]);

impl CartesianPose {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Orientation as a unit quaternion. A zero quaternion maps to the identity.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        let o = &self.orientation;
        UnitQuaternion::try_new(Quaternion::new(o.w, o.x, o.y, o.z), ROTATION_EPSILON)
            .unwrap_or_else(UnitQuaternion::identity)
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.position.x, self.position.y, self.position.z)
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation()), self.rotation())
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        let t = &iso.translation.vector;
        let q = iso.rotation.quaternion();
        Self {
            position: Position { x: t.x, y: t.y, z: t.z },
            orientation: Orientation { x: q.i, y: q.j, z: q.k, w: q.w },
        }
    }

    /// True when every component is finite and the quaternion is not degenerate.
    pub fn is_well_formed(&self) -> bool {
        let p = &self.position;
        let o = &self.orientation;
        let finite = [p.x, p.y, p.z, o.x, o.y, o.z, o.w].iter().all(|v| v.is_finite());
        let norm = (o.x * o.x + o.y * o.y + o.z * o.z + o.w * o.w).sqrt();
        finite && norm > ROTATION_EPSILON
    }
}

impl NativePose {
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.0[0], self.0[1], self.0[2])
    }

    pub fn rotation_vector(&self) -> Vector3<f64> {
        Vector3::new(self.0[3], self.0[4], self.0[5])
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        to_cartesian(self).to_isometry()
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        to_native(&CartesianPose::from_isometry(iso))
    }
}

/// Quaternion pose to native rotation-vector pose.
pub fn to_native(pose: &CartesianPose) -> NativePose {
    let t = pose.translation();
    // scaled_axis() returns zero for a vanishing angle, so identity needs no special case.
    let r = pose.rotation().scaled_axis();
    NativePose([t.x, t.y, t.z, r.x, r.y, r.z])
}

/// Native rotation-vector pose to quaternion pose.
pub fn to_cartesian(native: &NativePose) -> CartesianPose {
    let t = native.translation();
    let rotvec = native.rotation_vector();
    let angle = rotvec.norm();
    let rotation = if angle < ROTATION_EPSILON {
        UnitQuaternion::identity()
    } else {
        let axis = nalgebra::Unit::new_unchecked(rotvec / angle);
        UnitQuaternion::from_axis_angle(&axis, angle)
    };
    CartesianPose::from_isometry(&Isometry3::from_parts(Translation3::from(t), rotation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(position: [f64; 3], q: [f64; 4]) -> CartesianPose {
        CartesianPose {
            position: Position { x: position[0], y: position[1], z: position[2] },
            orientation: Orientation { x: q[0], y: q[1], z: q[2], w: q[3] },
        }
    }

    fn quaternion_dot(a: &CartesianPose, b: &CartesianPose) -> f64 {
        let (qa, qb) = (a.rotation(), b.rotation());
        qa.coords.dot(&qb.coords)
    }

    #[test]
    fn round_trip_preserves_orientation_up_to_sign() {
        let samples = [
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, -1.0],
            [0.3, -0.2, 0.9, 0.1],
            [-0.5, 0.5, -0.5, 0.5],
            [0.01, 0.02, -0.03, -0.99],
            [2.0, 1.0, -3.0, 0.5],
        ];
        for q in samples {
            let original = pose([0.4, -0.1, 0.7], q);
            let restored = to_cartesian(&to_native(&original));
            assert!(
                (quaternion_dot(&original, &restored).abs() - 1.0).abs() < 1e-9,
                "quaternion {:?} did not survive the round trip",
                q
            );
            assert!((restored.position.x - 0.4).abs() < 1e-12);
            assert!((restored.position.z - 0.7).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_rotation_vector_is_identity() {
        let cartesian = to_cartesian(&NativePose([1.0, 2.0, 3.0, 0.0, 0.0, 0.0]));
        assert_eq!(cartesian.orientation, Orientation::default());
        assert_eq!(cartesian.position, Position { x: 1.0, y: 2.0, z: 3.0 });
    }

    #[test]
    fn identity_orientation_encodes_to_zero_rotation_vector() {
        let native = to_native(&CartesianPose::identity());
        assert_eq!(native.rotation_vector(), Vector3::zeros());
    }

    #[test]
    fn rotation_vector_magnitude_is_the_angle() {
        let half = std::f64::consts::FRAC_PI_4;
        // 90 degrees about z
        let native = to_native(&pose([0.0; 3], [0.0, 0.0, half.sin(), half.cos()]));
        assert!(native.0[3].abs() < 1e-12);
        assert!(native.0[4].abs() < 1e-12);
        assert!((native.0[5] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn unnormalized_quaternion_is_normalized_first() {
        let scaled = to_native(&pose([0.0; 3], [0.0, 0.0, 2.0, 2.0]));
        let unit = to_native(&pose([0.0; 3], [0.0, 0.0, 0.5f64.sqrt(), 0.5f64.sqrt()]));
        for i in 0..6 {
            assert!((scaled.0[i] - unit.0[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn degenerate_quaternion_is_not_well_formed() {
        assert!(!pose([0.0; 3], [0.0; 4]).is_well_formed());
        assert!(!pose([f64::NAN, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]).is_well_formed());
        assert!(pose([0.0; 3], [0.0, 0.0, 0.0, 1.0]).is_well_formed());
    }
}
