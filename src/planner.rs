//! Trapezoidal profile planner for single joint-space moves
//!
//! The dominant-axis displacement decides the profile. The move is modelled as a
//! symmetric accelerate/cruise/decelerate trapezoid with a fixed acceleration; the
//! planner picks the cruise velocity that finishes in the requested time, stretching
//! the time when it is physically too short.

use tracing::warn;

use crate::types::{first_limit_violation, JointVector};
use crate::{MotionError, Result};

/// Guards the square root at the feasibility boundary against rounding below zero.
const FEASIBILITY_EPSILON: f64 = 1e-11;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    pub joint_limits: JointVector,
    pub acceleration: f64,
    pub joint_velocity_max: f64,
}

/// Velocity and acceleration for one joint move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedMove {
    pub velocity: f64,
    pub acceleration: f64,
    /// Duration actually planned, never shorter than requested.
    pub duration: f64,
    pub ramp_time: f64,
    /// Largest single-joint displacement, rad.
    pub path_length: f64,
    /// Set when the requested duration was too short and had to be stretched.
    pub clamped: bool,
}

impl PlannedMove {
    /// Nothing to do: the target equals the current position.
    pub fn is_stationary(&self) -> bool {
        self.path_length == 0.0
    }
}

#[derive(Debug, Clone)]
pub struct TrapezoidalPlanner {
    limits: MotionLimits,
}

impl TrapezoidalPlanner {
    pub fn new(limits: MotionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &MotionLimits {
        &self.limits
    }

    /// Shortest duration that can cover `path_length` with the configured acceleration.
    pub fn minimum_duration(&self, path_length: f64) -> f64 {
        (4.0 * path_length / self.limits.acceleration).sqrt()
    }

    pub fn plan(&self, current: &JointVector, desired: &JointVector, requested_duration: f64) -> Result<PlannedMove> {
        if let Some(joint) = first_limit_violation(desired, &self.limits.joint_limits) {
            return Err(MotionError::Validation(format!(
                "joint {} target {:.4} rad exceeds limit {:.4} rad",
                joint, desired[joint], self.limits.joint_limits[joint]
            )));
        }
        if requested_duration == 0.0 {
            return Err(MotionError::Validation("duration must be non-zero".to_string()));
        }
        if !(requested_duration.is_finite() && requested_duration > 0.0) {
            return Err(MotionError::Validation(format!(
                "duration must be a positive number of seconds, got {}",
                requested_duration
            )));
        }

        let path_length = desired
            .iter()
            .zip(current.iter())
            .map(|(d, c)| (d - c).abs())
            .fold(0.0, f64::max);
        let acceleration = self.limits.acceleration;

        let mut duration = requested_duration;
        let mut clamped = false;
        if acceleration < 4.0 * path_length / (duration * duration) {
            duration = self.minimum_duration(path_length);
            clamped = true;
            warn!(
                "Requested duration {:.3}s too short for {:.4} rad, using {:.3}s",
                requested_duration, path_length, duration
            );
        }

        let radicand = (duration * duration * acceleration - 4.0 * path_length) / acceleration + FEASIBILITY_EPSILON;
        // Stationary targets can leave the ramp a hair below zero.
        let ramp_time = (duration / 2.0 - 0.5 * radicand.sqrt()).max(0.0);
        let velocity = ramp_time * acceleration;

        if velocity > self.limits.joint_velocity_max {
            return Err(MotionError::VelocityLimitExceeded {
                requested: velocity,
                max: self.limits.joint_velocity_max,
            });
        }

        Ok(PlannedMove {
            velocity,
            acceleration,
            duration,
            ramp_time,
            path_length,
            clamped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ACCELERATION, JOINT_LIMIT, JOINT_VELOCITY_MAX};

    fn planner() -> TrapezoidalPlanner {
        TrapezoidalPlanner::new(MotionLimits {
            joint_limits: JOINT_LIMIT,
            acceleration: ACCELERATION,
            joint_velocity_max: JOINT_VELOCITY_MAX,
        })
    }

    #[test]
    fn short_duration_is_stretched_to_the_minimum() {
        let planned = planner().plan(&[0.0; 6], &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 0.1).unwrap();
        let minimum = (4.0 / ACCELERATION).sqrt();
        assert!(0.1 < minimum);
        assert!(planned.clamped);
        assert!((planned.duration - minimum).abs() < 1e-12);
        assert!(planned.velocity <= JOINT_VELOCITY_MAX);
        // With no cruise phase the distance is v * ta.
        assert!((planned.velocity * planned.ramp_time - planned.path_length).abs() < 1e-5);
        assert_eq!(planned.path_length, 1.0);
    }

    #[test]
    fn feasible_duration_is_kept() {
        let planned = planner().plan(&[0.0; 6], &[0.0, 0.5, -0.2, 0.0, 0.0, 0.0], 3.0).unwrap();
        assert!(!planned.clamped);
        assert_eq!(planned.duration, 3.0);
        assert_eq!(planned.acceleration, ACCELERATION);
        // Area under the trapezoid equals the dominant displacement.
        let covered = planned.velocity * (planned.duration - planned.ramp_time);
        assert!((covered - 0.5).abs() < 1e-5);
        assert!(planned.ramp_time < planned.duration / 2.0);
    }

    #[test]
    fn path_length_uses_the_dominant_axis() {
        let planned = planner().plan(&[0.1, 0.2, 0.3, 0.0, 0.0, 0.0], &[0.2, -0.6, 0.3, 0.4, 0.0, 0.0], 5.0).unwrap();
        assert!((planned.path_length - 0.8).abs() < 1e-12);
    }

    #[test]
    fn out_of_limit_target_is_rejected_before_planning() {
        let mut desired = [0.0; 6];
        desired[2] = JOINT_LIMIT[2] + 0.01;
        // Zero duration would also be invalid; the limit check must win.
        let err = planner().plan(&[0.0; 6], &desired, 0.0).unwrap_err();
        match err {
            MotionError::Validation(msg) => assert!(msg.contains("joint 2")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn zero_and_negative_durations_are_rejected() {
        let p = planner();
        assert!(matches!(p.plan(&[0.0; 6], &[0.1; 6], 0.0), Err(MotionError::Validation(_))));
        assert!(matches!(p.plan(&[0.0; 6], &[0.1; 6], -1.0), Err(MotionError::Validation(_))));
        assert!(matches!(p.plan(&[0.0; 6], &[0.1; 6], f64::NAN), Err(MotionError::Validation(_))));
    }

    #[test]
    fn velocity_above_the_limit_is_rejected() {
        let p = TrapezoidalPlanner::new(MotionLimits {
            joint_limits: JOINT_LIMIT,
            acceleration: 10.0,
            joint_velocity_max: 0.5,
        });
        let err = p.plan(&[0.0; 6], &[3.0, 0.0, 0.0, 0.0, 0.0, 0.0], 0.5).unwrap_err();
        match err {
            MotionError::VelocityLimitExceeded { requested, max } => {
                assert!(requested > max);
                assert_eq!(max, 0.5);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn stationary_target_plans_a_zero_velocity_move() {
        let planned = planner().plan(&[0.4; 6], &[0.4; 6], 1.0).unwrap();
        assert!(planned.is_stationary());
        assert_eq!(planned.velocity, 0.0);
        assert!(!planned.clamped);
    }
}
