//! In-process simulated arm
//!
//! Motions complete instantly and FK/IK come from the analytic UR10e model. Every
//! command is recorded so callers can assert on exactly what reached the driver.

use parking_lot::Mutex;
use tracing::debug;

use crate::config::JOINT_LIMIT;
use crate::driver::RobotDriver;
use crate::kinematics;
use crate::pose::NativePose;
use crate::types::{FreeAxes, JointVector, JointVelocity, Wrench};
use crate::{MotionError, Result};

/// A command issued to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    MoveJ { positions: JointVector, velocity: f64, acceleration: f64 },
    MoveL { pose: NativePose, velocity: f64 },
    SpeedStop(f64),
    StopJ(f64),
    FreedriveMode(FreeAxes),
    EndFreedriveMode,
    ZeroFtSensor,
    Disconnect,
}

impl DriverCall {
    pub fn is_motion(&self) -> bool {
        matches!(self, DriverCall::MoveJ { .. } | DriverCall::MoveL { .. })
    }
}

#[derive(Debug)]
struct SimState {
    q: JointVector,
    qd: JointVelocity,
    wrench: Wrench,
    wrench_offset: Wrench,
    freedrive: Option<FreeAxes>,
    robot_mode: i32,
    safety_mode: i32,
    safety_status_bits: u32,
    connected: bool,
    calls: Vec<DriverCall>,
}

pub struct SimulatedDriver {
    state: Mutex<SimState>,
}

impl SimulatedDriver {
    pub fn new(initial_q: JointVector) -> Self {
        Self {
            state: Mutex::new(SimState {
                q: initial_q,
                qd: [0.0; 6],
                wrench: [0.0; 6],
                wrench_offset: [0.0; 6],
                freedrive: None,
                robot_mode: 7,
                safety_mode: 0,
                safety_status_bits: 1,
                connected: true,
                calls: Vec::new(),
            }),
        }
    }

    /// Snapshot of every command received so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn set_joint_positions(&self, q: JointVector) {
        self.state.lock().q = q;
    }

    /// Raw sensor wrench, before the zero offset is applied.
    pub fn set_wrench(&self, wrench: Wrench) {
        self.state.lock().wrench = wrench;
    }

    pub fn set_safety(&self, robot_mode: i32, safety_mode: i32, safety_status_bits: u32) {
        let mut state = self.state.lock();
        state.robot_mode = robot_mode;
        state.safety_mode = safety_mode;
        state.safety_status_bits = safety_status_bits;
    }

    /// Drop the simulated connection; every later call fails as a driver failure.
    pub fn sever_connection(&self) {
        self.state.lock().connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn freedrive_axes(&self) -> Option<FreeAxes> {
        self.state.lock().freedrive
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut SimState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(MotionError::Driver("simulated robot is disconnected".to_string()));
        }
        f(&mut state)
    }
}

impl RobotDriver for SimulatedDriver {
    fn move_j(&self, positions: &JointVector, velocity: f64, acceleration: f64) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::MoveJ { positions: *positions, velocity, acceleration });
            state.q = *positions;
            debug!("sim move_j to {:?}", positions);
            Ok(())
        })
    }

    fn move_l(&self, pose: &NativePose, velocity: f64) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::MoveL { pose: *pose, velocity });
            let q = kinematics::inverse_kinematics(&pose.to_isometry(), &state.q, &JOINT_LIMIT)
                .map_err(|e| MotionError::CommandRejected(format!("move_l target unreachable: {}", e)))?;
            state.q = q;
            Ok(())
        })
    }

    fn speed_stop(&self, deceleration: f64) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::SpeedStop(deceleration));
            state.qd = [0.0; 6];
            Ok(())
        })
    }

    fn stop_j(&self, deceleration: f64) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::StopJ(deceleration));
            state.qd = [0.0; 6];
            Ok(())
        })
    }

    fn freedrive_mode(&self, free_axes: &FreeAxes) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::FreedriveMode(*free_axes));
            state.freedrive = Some(*free_axes);
            Ok(())
        })
    }

    fn end_freedrive_mode(&self) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::EndFreedriveMode);
            state.freedrive = None;
            Ok(())
        })
    }

    fn zero_ft_sensor(&self) -> Result<()> {
        self.with_connection(|state| {
            state.calls.push(DriverCall::ZeroFtSensor);
            state.wrench_offset = state.wrench;
            Ok(())
        })
    }

    fn get_forward_kinematics(&self, q: &JointVector) -> Result<NativePose> {
        self.with_connection(|_| Ok(NativePose::from_isometry(&kinematics::forward_kinematics(q))))
    }

    fn get_inverse_kinematics(&self, pose: &NativePose) -> Result<JointVector> {
        self.with_connection(|state| {
            kinematics::inverse_kinematics(&pose.to_isometry(), &state.q, &JOINT_LIMIT)
        })
    }

    fn get_actual_q(&self) -> Result<JointVector> {
        self.with_connection(|state| Ok(state.q))
    }

    fn get_actual_qd(&self) -> Result<JointVelocity> {
        self.with_connection(|state| Ok(state.qd))
    }

    fn get_actual_tcp_pose(&self) -> Result<NativePose> {
        self.with_connection(|state| {
            Ok(NativePose::from_isometry(&kinematics::forward_kinematics(&state.q)))
        })
    }

    fn get_actual_tcp_force(&self) -> Result<Wrench> {
        self.with_connection(|state| {
            let mut wrench = state.wrench;
            for (w, offset) in wrench.iter_mut().zip(state.wrench_offset.iter()) {
                *w -= offset;
            }
            Ok(wrench)
        })
    }

    fn get_robot_mode(&self) -> Result<i32> {
        self.with_connection(|state| Ok(state.robot_mode))
    }

    fn get_safety_mode(&self) -> Result<i32> {
        self.with_connection(|state| Ok(state.safety_mode))
    }

    fn get_safety_status_bits(&self) -> Result<u32> {
        self.with_connection(|state| Ok(state.safety_status_bits))
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(DriverCall::Disconnect);
        state.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_in_order() {
        let driver = SimulatedDriver::new([0.0; 6]);
        driver.move_j(&[0.1; 6], 1.0, 1.4).unwrap();
        driver.stop_j(2.0).unwrap();
        driver.disconnect().unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::MoveJ { positions: [0.1; 6], velocity: 1.0, acceleration: 1.4 },
                DriverCall::StopJ(2.0),
                DriverCall::Disconnect,
            ]
        );
        assert!(driver.get_actual_q().unwrap_err().is_fatal());
    }

    #[test]
    fn zeroing_the_sensor_subtracts_the_current_reading() {
        let driver = SimulatedDriver::new([0.0; 6]);
        driver.set_wrench([1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        driver.zero_ft_sensor().unwrap();
        assert_eq!(driver.get_actual_tcp_force().unwrap(), [0.0; 6]);
        driver.set_wrench([1.5, 2.0, 3.0, 0.1, 0.2, 0.3]);
        assert_eq!(driver.get_actual_tcp_force().unwrap()[0], 0.5);
    }

    #[test]
    fn move_l_reaches_the_requested_pose() {
        let start = [0.3, -1.2, 1.5, -0.4, 1.1, 0.7];
        let target = [0.35, -1.15, 1.45, -0.35, 1.05, 0.75];
        let driver = SimulatedDriver::new(start);
        let pose = driver.get_forward_kinematics(&target).unwrap();
        driver.move_l(&pose, 0.25).unwrap();
        let reached = driver.get_actual_tcp_pose().unwrap();
        for i in 0..3 {
            assert!((reached.0[i] - pose.0[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn freedrive_toggles() {
        let driver = SimulatedDriver::new([0.0; 6]);
        driver.freedrive_mode(&[true, true, true, false, false, false]).unwrap();
        assert!(driver.freedrive_axes().is_some());
        driver.end_freedrive_mode().unwrap();
        assert!(driver.freedrive_axes().is_none());
    }
}
