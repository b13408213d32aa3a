//! Shared joint-space and sensor types

use serde::{Deserialize, Serialize};

use crate::pose::CartesianPose;
use crate::{MotionError, Result};

pub const JOINT_COUNT: usize = 6;

/// Joint positions in radians, base to wrist 3.
pub type JointVector = [f64; JOINT_COUNT];

/// Joint velocities in rad/s.
pub type JointVelocity = [f64; JOINT_COUNT];

/// Force/torque reading at the TCP: [fx, fy, fz, tx, ty, tz].
pub type Wrench = [f64; 6];

/// Per-axis compliance mask for freedrive, base frame [x, y, z, rx, ry, rz].
pub type FreeAxes = [bool; 6];

/// Latest robot kinematic state, refreshed once per control tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    pub joint_positions: JointVector,
    pub tcp_pose: CartesianPose,
    pub timestamp: f64,
}

impl Default for KinematicState {
    fn default() -> Self {
        Self {
            joint_positions: [0.0; JOINT_COUNT],
            tcp_pose: CartesianPose::identity(),
            timestamp: 0.0,
        }
    }
}

/// Convert a wire-level vector into a fixed-size joint vector.
pub fn joint_vector_from_slice(values: &[f64], field: &str) -> Result<JointVector> {
    values.try_into().map_err(|_| {
        MotionError::Validation(format!(
            "{} must have {} elements, got {}",
            field,
            JOINT_COUNT,
            values.len()
        ))
    })
}

/// Index of the first joint whose magnitude exceeds its limit.
pub fn first_limit_violation(positions: &JointVector, limits: &JointVector) -> Option<usize> {
    positions
        .iter()
        .zip(limits.iter())
        .position(|(q, limit)| !q.is_finite() || q.abs() > *limit)
}

/// Freedrive mask from an integer list where non-zero means compliant.
pub fn free_axes_from_slice(values: &[i32]) -> Result<FreeAxes> {
    if values.len() != 6 {
        return Err(MotionError::Validation(format!(
            "free_axes must have 6 elements, got {}",
            values.len()
        )));
    }
    let mut axes = [false; 6];
    for (axis, value) in axes.iter_mut().zip(values) {
        *axis = *value != 0;
    }
    Ok(axes)
}

pub fn current_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_vector_requires_six_elements() {
        assert_eq!(joint_vector_from_slice(&[1.0; 6], "positions").unwrap(), [1.0; 6]);
        let err = joint_vector_from_slice(&[1.0; 5], "positions").unwrap_err();
        assert!(err.to_string().contains("got 5"));
        assert!(joint_vector_from_slice(&[], "positions").is_err());
    }

    #[test]
    fn limit_violation_reports_first_offending_joint() {
        let limits = [1.0; 6];
        assert_eq!(first_limit_violation(&[0.5; 6], &limits), None);
        assert_eq!(first_limit_violation(&[1.0; 6], &limits), None);
        assert_eq!(first_limit_violation(&[0.0, 0.0, -1.5, 2.0, 0.0, 0.0], &limits), Some(2));
        assert_eq!(first_limit_violation(&[f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0], &limits), Some(0));
    }

    #[test]
    fn free_axes_mask() {
        assert_eq!(
            free_axes_from_slice(&[1, 1, 1, 0, 0, 0]).unwrap(),
            [true, true, true, false, false, false]
        );
        assert!(free_axes_from_slice(&[1, 0]).is_err());
    }
}
