//! Rest-to-rest quintic joint trajectories
//!
//! Each joint follows `q(t) = q0 + (q1 - q0) * s(t / T)` with
//! `s(τ) = 10τ³ - 15τ⁴ + 6τ⁵`, so velocity and acceleration are zero at both ends.

use crate::goal::Waypoint;
use crate::types::{JointVector, JOINT_COUNT};
use crate::{MotionError, Result};

fn blend(tau: f64) -> (f64, f64, f64) {
    let tau2 = tau * tau;
    let tau3 = tau2 * tau;
    let s = tau3 * (10.0 - 15.0 * tau + 6.0 * tau2);
    let ds = 30.0 * tau2 * (1.0 - tau) * (1.0 - tau);
    let dds = 60.0 * tau * (1.0 - tau) * (1.0 - 2.0 * tau);
    (s, ds, dds)
}

/// Sample the trajectory from `start` to `goal` every `dt` seconds, both ends included.
///
/// When `final_time` is not a multiple of `dt` the last interval is shorter; the
/// final sample always lands exactly on `final_time`.
pub fn quintic_joint_trajectory(
    start: &JointVector,
    goal: &JointVector,
    final_time: f64,
    dt: f64,
) -> Result<Vec<Waypoint>> {
    if !(final_time.is_finite() && final_time > 0.0) {
        return Err(MotionError::Validation(format!("final time must be positive, got {}", final_time)));
    }
    if !(dt.is_finite() && dt > 0.0 && dt <= final_time) {
        return Err(MotionError::Validation(format!(
            "sample period must be in (0, {}], got {}",
            final_time, dt
        )));
    }

    // Samples within a hair of the end collapse onto it.
    let last_interior = final_time - 1e-9 * dt;
    let waypoints = (0u32..)
        .map(|k| f64::from(k) * dt)
        .take_while(|t| *t < last_interior)
        .chain(std::iter::once(final_time))
        .map(|t| {
            let tau = t / final_time;
            let (s, ds, dds) = blend(tau);
            let mut positions = [0.0; JOINT_COUNT];
            let mut velocities = [0.0; JOINT_COUNT];
            let mut accelerations = [0.0; JOINT_COUNT];
            for j in 0..JOINT_COUNT {
                let delta = goal[j] - start[j];
                positions[j] = start[j] + delta * s;
                velocities[j] = delta * ds / final_time;
                accelerations[j] = delta * dds / (final_time * final_time);
            }
            Waypoint {
                positions,
                velocities: Some(velocities),
                accelerations: Some(accelerations),
                effort: None,
            }
        })
        .collect();
    Ok(waypoints)
}

/// `start` with one joint moved by `offset` radians.
pub fn offset_joint(start: &JointVector, joint: usize, offset: f64) -> Result<JointVector> {
    if joint >= JOINT_COUNT {
        return Err(MotionError::Validation(format!("joint index {} out of range", joint)));
    }
    let mut goal = *start;
    goal[joint] += offset;
    Ok(goal)
}
