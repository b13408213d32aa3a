//! Robot driver contract
//!
//! Everything the controller needs from the arm goes through [`RobotDriver`]. Calls are
//! synchronous and assumed bounded; implementations must be safe to share between the
//! control thread and the telemetry threads.

use crate::pose::NativePose;
use crate::types::{FreeAxes, JointVector, JointVelocity, Wrench};
use crate::Result;

/// Low-level arm driver.
///
/// Connection problems must be reported as [`crate::MotionError::Driver`]; they are
/// fatal to the controller and never retried. A command the robot refuses while
/// still connected is [`crate::MotionError::CommandRejected`].
pub trait RobotDriver: Send + Sync {
    /// Joint-space move to `positions` with the given peak velocity and acceleration.
    ///
    /// Returns once the arm has arrived and come to rest. A move the robot abandons
    /// (safety stop, program replaced) is [`crate::MotionError::CommandRejected`].
    fn move_j(&self, positions: &JointVector, velocity: f64, acceleration: f64) -> Result<()>;

    /// Linear tool-space move to `pose`. Blocks like [`RobotDriver::move_j`].
    fn move_l(&self, pose: &NativePose, velocity: f64) -> Result<()>;

    /// Decelerate tool-space motion to zero.
    fn speed_stop(&self, deceleration: f64) -> Result<()>;

    /// Decelerate joint-space motion to zero, returning once the arm is at rest.
    fn stop_j(&self, deceleration: f64) -> Result<()>;

    fn freedrive_mode(&self, free_axes: &FreeAxes) -> Result<()>;
    fn end_freedrive_mode(&self) -> Result<()>;
    fn zero_ft_sensor(&self) -> Result<()>;

    /// TCP pose for the given joint positions.
    fn get_forward_kinematics(&self, q: &JointVector) -> Result<NativePose>;

    /// Joint positions reaching `pose`, or [`crate::MotionError::KinematicUnreachable`].
    fn get_inverse_kinematics(&self, pose: &NativePose) -> Result<JointVector>;

    fn get_actual_q(&self) -> Result<JointVector>;
    fn get_actual_qd(&self) -> Result<JointVelocity>;
    fn get_actual_tcp_pose(&self) -> Result<NativePose>;
    fn get_actual_tcp_force(&self) -> Result<Wrench>;

    /// Robot mode, -1 (no controller) through 8 (updating firmware).
    fn get_robot_mode(&self) -> Result<i32>;

    /// Safety mode, 0 (normal) through 8 (fault).
    fn get_safety_mode(&self) -> Result<i32>;

    /// Safety status flags, one bit per condition.
    fn get_safety_status_bits(&self) -> Result<u32>;

    fn disconnect(&self) -> Result<()>;
}
