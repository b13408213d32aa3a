//! Kinematic model of the UR10e
//!
//! Forward and inverse kinematics exposed to the rest of the controller go through the
//! robot driver (see [`KinematicModel`]). The free functions below evaluate the arm
//! geometry locally: Denavit-Hartenberg forward kinematics, the geometric Jacobian,
//! the closed-form `J_dot(q) * dq` product and a damped least-squares IK solver.

use nalgebra::{Isometry3, Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};
use std::sync::Arc;

use crate::driver::RobotDriver;
use crate::pose::{to_cartesian, to_native, CartesianPose};
use crate::types::{first_limit_violation, JointVector, JointVelocity};
use crate::{MotionError, Result};

/// Classic DH parameters of one joint, meters and radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DhParameters {
    pub a: f64,
    pub d: f64,
    pub alpha: f64,
}

pub const UR10E_DH: [DhParameters; 6] = [
    DhParameters { a: 0.0, d: 0.1807, alpha: std::f64::consts::FRAC_PI_2 },
    DhParameters { a: -0.6127, d: 0.0, alpha: 0.0 },
    DhParameters { a: -0.57155, d: 0.0, alpha: 0.0 },
    DhParameters { a: 0.0, d: 0.17415, alpha: std::f64::consts::FRAC_PI_2 },
    DhParameters { a: 0.0, d: 0.11985, alpha: -std::f64::consts::FRAC_PI_2 },
    DhParameters { a: 0.0, d: 0.11655, alpha: 0.0 },
];

const IK_MAX_ITERATIONS: usize = 200;
const IK_TOLERANCE: f64 = 1e-10;
const IK_DAMPING: f64 = 1e-3;
const IK_MAX_STEP: f64 = 0.5;

/// Driver-backed FK/IK, wrapped with the pose codec.
#[derive(Clone)]
pub struct KinematicModel {
    driver: Arc<dyn RobotDriver>,
}

impl KinematicModel {
    pub fn new(driver: Arc<dyn RobotDriver>) -> Self {
        Self { driver }
    }

    pub fn forward_kinematics(&self, q: &JointVector) -> Result<CartesianPose> {
        let native = self.driver.get_forward_kinematics(q)?;
        Ok(to_cartesian(&native))
    }

    /// Fails with [`MotionError::KinematicUnreachable`] when the solver has no answer.
    pub fn inverse_kinematics(&self, pose: &CartesianPose) -> Result<JointVector> {
        self.driver.get_inverse_kinematics(&to_native(pose))
    }

    pub fn jacobian_dot_dq(&self, q: &JointVector, dq: &JointVelocity) -> Vector6<f64> {
        jacobian_dot_dq(q, dq)
    }
}

fn dh_transform(dh: &DhParameters, theta: f64) -> Isometry3<f64> {
    let (s, c) = theta.sin_cos();
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta)
        * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), dh.alpha);
    Isometry3::from_parts(Translation3::new(dh.a * c, dh.a * s, dh.d), rotation)
}

/// Base frame followed by the frame after each joint; the last entry is the flange.
pub fn joint_frames(q: &JointVector) -> [Isometry3<f64>; 7] {
    let mut frames = [Isometry3::identity(); 7];
    for (i, (dh, theta)) in UR10E_DH.iter().zip(q.iter()).enumerate() {
        frames[i + 1] = frames[i] * dh_transform(dh, *theta);
    }
    frames
}

/// Flange pose in the base frame.
pub fn forward_kinematics(q: &JointVector) -> Isometry3<f64> {
    joint_frames(q)[6]
}

/// 6x6 geometric Jacobian in the base frame, linear rows first.
pub fn geometric_jacobian(q: &JointVector) -> Matrix6<f64> {
    let frames = joint_frames(q);
    let tip = frames[6].translation.vector;
    let mut jacobian = Matrix6::zeros();
    for i in 0..6 {
        let z = frames[i].rotation * Vector3::z();
        let p = frames[i].translation.vector;
        let linear = z.cross(&(tip - p));
        jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
        jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&z);
    }
    jacobian
}

/// Closed-form `J_dot(q) * dq` for the UR10e.
///
/// Quadratic in `dq`, zero when `dq` is zero. Rows follow [`geometric_jacobian`]:
/// linear acceleration terms first, angular last.
#[rustfmt::skip]
pub fn jacobian_dot_dq(q: &JointVector, dq: &JointVelocity) -> Vector6<f64> {
    let (s0, c0) = q[0].sin_cos();
    let (s1, c1) = q[1].sin_cos();
    let (s4, c4) = q[4].sin_cos();
    let (s5, c5) = q[5].sin_cos();
    let (s12, c12) = (q[1] + q[2]).sin_cos();
    let (s123, c123) = (q[1] + q[2] + q[3]).sin_cos();
    let [dq0, dq1, dq2, dq3, dq4, dq5] = *dq;
    let d12 = dq1 + dq2;
    let d123 = dq1 + dq2 + dq3;

    let r0 = -dq0*(s0*(s12*d12*1.1431E+4+dq1*s1*1.2254E+4)*5.0E-5+dq0*s0*1.7415E-1+dq0*c4*s0*1.1655E-1+dq4*c0*s4*1.1655E-1
        + dq0*s123*c0*1.1985E-1+c123*s0*d123*1.1985E-1-dq0*c0*(c12*1.1431E+4+c1*1.2254E+4)*5.0E-5-dq0*c123*c0*s4*1.1655E-1
        - dq4*c123*c4*s0*1.1655E-1+s123*s0*s4*d123*1.1655E-1)+dq3*(c0*(s123*d123*-7.99E+2+dq4*s123*c4*7.77E+2
        + c123*s4*d123*7.77E+2)*1.5E-4-dq0*s0*(c123*7.99E+2+s123*s4*7.77E+2)*1.5E-4)+dq4*(dq0*c0*s4*-1.1655E-1
        - dq4*c4*s0*1.1655E-1+dq0*c123*c4*s0*1.1655E-1+dq4*c123*c0*s4*1.1655E-1+s123*c0*c4*d123*1.1655E-1)
        + dq1*((c0*(s123*d123*-2.397E+3+c12*d12*1.1431E+4+dq1*c1*1.2254E+4+dq4*s123*c4*2.331E+3+c123*s4*d123*2.331E+3))/2.0E+4
        - (dq0*s0*(c123*2.397E+3+s12*1.1431E+4+s1*1.2254E+4+s123*s4*2.331E+3))/2.0E+4)+dq2*((c0*(s123*d123*-2.397E+3
        + c12*d12*1.1431E+4+dq4*s123*c4*2.331E+3+c123*s4*d123*2.331E+3))/2.0E+4-(dq0*s0*(c123*2.397E+3
        + s12*1.1431E+4+s123*s4*2.331E+3))/2.0E+4);
    let r1 = dq3*(s0*(s123*d123*-7.99E+2+dq4*s123*c4*7.77E+2+c123*s4*d123*7.77E+2)*1.5E-4+dq0*c0*(c123*7.99E+2
        + s123*s4*7.77E+2)*1.5E-4)+dq1*((s0*(s123*d123*-2.397E+3+c12*d12*1.1431E+4+dq1*c1*1.2254E+4+dq4*s123*c4*2.331E+3
        + c123*s4*d123*2.331E+3))/2.0E+4+(dq0*c0*(c123*2.397E+3+s12*1.1431E+4+s1*1.2254E+4+s123*s4*2.331E+3))/2.0E+4)
        + dq4*(dq4*c0*c4*1.1655E-1-dq0*s0*s4*1.1655E-1-dq0*c123*c0*c4*1.1655E-1+dq4*c123*s0*s4*1.1655E-1
        + s123*c4*s0*d123*1.1655E-1)+dq2*((s0*(s123*d123*-2.397E+3+c12*d12*1.1431E+4+dq4*s123*c4*2.331E+3
        + c123*s4*d123*2.331E+3))/2.0E+4+(dq0*c0*(c123*2.397E+3+s12*1.1431E+4+s123*s4*2.331E+3))/2.0E+4)
        + dq0*(c0*(s12*d12*1.1431E+4+dq1*s1*1.2254E+4)*5.0E-5+dq0*c0*1.7415E-1+dq0*c0*c4*1.1655E-1-dq4*s0*s4*1.1655E-1
        - dq0*s123*s0*1.1985E-1+c123*c0*d123*1.1985E-1+dq0*s0*(c12*1.1431E+4+c1*1.2254E+4)*5.0E-5-dq4*c123*c0*c4*1.1655E-1
        + dq0*c123*s0*s4*1.1655E-1+s123*c0*s4*d123*1.1655E-1);
    let r2 = dq3*(c123*d123*1.1985E-1-dq4*c123*c4*1.1655E-1+s123*s4*d123*1.1655E-1)+dq1*(c123*d123*1.1985E-1
        + s12*d12*5.7155E-1+dq1*s1*6.127E-1-dq4*c123*c4*1.1655E-1+s123*s4*d123*1.1655E-1)+dq4*(dq4*s123*s4*1.1655E-1
        - c123*c4*d123*1.1655E-1)+dq2*(c123*d123*1.1985E-1+s12*d12*5.7155E-1-dq4*c123*c4*1.1655E-1+s123*s4*d123*1.1655E-1);
    let r3 = dq5*(dq0*c0*c4-dq4*s0*s4-dq4*c123*c0*c4+dq0*c123*s0*s4+s123*c0*s4*d123)-dq4*(dq0*s123*s0-c123*c0*d123)
        + dq0*dq1*c0+dq0*dq2*c0+dq0*dq3*c0;
    let r4 = dq5*(dq0*c4*s0+dq4*c0*s4-dq0*c123*c0*s4-dq4*c123*c4*s0+s123*s0*s4*d123)+dq4*(dq0*s123*c0+c123*s0*d123)
        + dq0*dq1*s0+dq0*dq2*s0+dq0*dq3*s0;
    let r5 = dq0*((c4*s0-c123*c0*s4)*(dq0*c0*c4-dq4*s0*s4-dq4*c123*c0*c4+dq0*c123*s0*s4+s123*c0*s4*d123)*2.0
        + (s0*s4*s5+s123*c0*c5+c123*c0*c4*s5)*(dq0*c0*s4*s5+dq4*c4*s0*s5+dq5*c5*s0*s4-dq0*s123*c5*s0-dq5*s123*c0*s5
        + c123*c0*c5*d123+dq5*c123*c0*c4*c5-dq0*c123*c4*s0*s5-dq4*c123*c0*s4*s5-s123*c0*c4*s5*d123)*2.0
        - (s123*c0*s5*-1.0+c5*s0*s4+c123*c0*c4*c5)*(-dq0*c0*c5*s4-dq4*c4*c5*s0+dq5*s0*s4*s5+dq5*s123*c0*c5
        - dq0*s123*s0*s5+c123*c0*s5*d123+dq0*c123*c4*c5*s0+dq4*c123*c0*c5*s4+dq5*c123*c0*c4*s5+s123*c0*c4*c5*d123)*2.0)
        - dq5*(dq4*s123*c4+c123*s4*d123)+dq4*((c0*s4-c123*c4*s0)*(dq0*c0*c4-dq4*s0*s4-dq4*c123*c0*c4+dq0*c123*s0*s4
        + s123*c0*s4*d123)+(c4*s0-c123*c0*s4)*(dq4*c0*c4-dq0*s0*s4-dq0*c123*c0*c4+dq4*c123*s0*s4+s123*c4*s0*d123)
        + c5*(c0*c4+c123*s0*s4)*(c5*(-dq0*c0*s4-dq4*c4*s0+dq0*c123*c4*s0+dq4*c123*c0*s4+s123*c0*c4*d123)
        + dq5*s5*(s0*s4+c123*c0*c4)+dq5*s123*c0*c5-dq0*s123*s0*s5+c123*c0*s5*d123)+c5*(c5*(s0*s4+c123*c0*c4)
        - s123*c0*s5)*(dq0*c4*s0+dq4*c0*s4-dq0*c123*c0*s4-dq4*c123*c4*s0+s123*s0*s4*d123)+s5*(c0*c4+c123*s0*s4)*(s5*(-dq0*c0*s4
        - dq4*c4*s0+dq0*c123*c4*s0+dq4*c123*c0*s4+s123*c0*c4*d123)-dq5*c5*(s0*s4+c123*c0*c4)+dq0*s123*c5*s0
        + dq5*s123*c0*s5-c123*c0*c5*d123)+s5*(s5*(s0*s4+c123*c0*c4)+s123*c0*c5)*(dq0*c4*s0+dq4*c0*s4-dq0*c123*c0*s4
        - dq4*c123*c4*s0+s123*s0*s4*d123)+dq5*s5*(c0*c4+c123*s0*s4)*(c5*(s0*s4+c123*c0*c4)-s123*c0*s5)
        - dq5*c5*(c0*c4+c123*s0*s4)*(s5*(s0*s4+c123*c0*c4)+s123*c0*c5));

    Vector6::new(r0, r1, r2, r3, r4, r5)
}

/// Damped least-squares IK for the flange pose, seeded from `seed`.
pub fn inverse_kinematics(
    target: &Isometry3<f64>,
    seed: &JointVector,
    joint_limits: &JointVector,
) -> Result<JointVector> {
    let mut q = *seed;
    for _ in 0..IK_MAX_ITERATIONS {
        let current = forward_kinematics(&q);
        let position_error = target.translation.vector - current.translation.vector;
        let rotation_error = (target.rotation * current.rotation.inverse()).scaled_axis();
        let error = Vector6::new(
            position_error.x,
            position_error.y,
            position_error.z,
            rotation_error.x,
            rotation_error.y,
            rotation_error.z,
        );
        if error.norm() < IK_TOLERANCE {
            if let Some(joint) = first_limit_violation(&q, joint_limits) {
                return Err(MotionError::KinematicUnreachable(format!(
                    "solution violates limit of joint {}",
                    joint
                )));
            }
            return Ok(q);
        }

        let jacobian = geometric_jacobian(&q);
        let damped = jacobian * jacobian.transpose() + Matrix6::identity() * (IK_DAMPING * IK_DAMPING);
        let Some(solved) = damped.cholesky().map(|c| c.solve(&error)) else {
            return Err(MotionError::KinematicUnreachable("singular configuration".to_string()));
        };
        let mut step = jacobian.transpose() * solved;
        let norm = step.norm();
        if norm > IK_MAX_STEP {
            step *= IK_MAX_STEP / norm;
        }
        for (qi, di) in q.iter_mut().zip(step.iter()) {
            *qi += di;
        }
    }
    Err(MotionError::KinematicUnreachable(format!(
        "no solution within {} iterations",
        IK_MAX_ITERATIONS
    )))
}
