//! Request handling shared by every transport
//!
//! [`ControlInterface`] turns a [`Request`] into a [`Response`]. Goals are checked
//! here so the caller gets an immediate success flag, then queued for the control
//! loop, which checks them again against the state it actually starts from.

use std::sync::Arc;
use tracing::{info, warn};

use crate::driver::RobotDriver;
use crate::executor::ExecutorLink;
use crate::gripper::{GripperCommand, GripperDriver, ObjectStatus};
use crate::goal::{CartesianGoal, JointGoal, MotionGoal};
use crate::kinematics::KinematicModel;
use crate::messages::{CartesianGoalMsg, GripperCommandMsg, JointGoalMsg, Request, Response, TrajectoryMsg};
use crate::planner::{MotionLimits, TrapezoidalPlanner};
use crate::pose::CartesianPose;
use crate::safety::SafetyStatus;
use crate::types::{first_limit_violation, free_axes_from_slice, joint_vector_from_slice, JointVector, KinematicState};
use crate::{MotionError, Result};

#[derive(Clone)]
pub struct ControlInterface {
    driver: Arc<dyn RobotDriver>,
    executor: ExecutorLink,
    kinematics: KinematicModel,
    planner: TrapezoidalPlanner,
    gripper: Option<Arc<dyn GripperDriver>>,
}

impl ControlInterface {
    pub fn new(
        driver: Arc<dyn RobotDriver>,
        executor: ExecutorLink,
        limits: MotionLimits,
        gripper: Option<Arc<dyn GripperDriver>>,
    ) -> Self {
        Self {
            kinematics: KinematicModel::new(driver.clone()),
            driver,
            executor,
            planner: TrapezoidalPlanner::new(limits),
            gripper,
        }
    }

    /// Dispatch one request. Never fails: errors become a failed response.
    pub async fn handle(&self, request: Request) -> Response {
        let name = request.name();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} request failed: {}", name, e);
                Response::failed(name, e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        let name = request.name();
        let response = match request {
            Request::JointGoal(msg) => {
                self.submit_joint_goal(msg)?;
                Response::ok(name, "Joint goal queued")
            }
            Request::CartesianGoal(msg) => {
                self.submit_cartesian_goal(msg)?;
                Response::ok(name, "Cartesian goal queued")
            }
            Request::Trajectory(msg) => {
                let waypoints = self.submit_trajectory(msg)?;
                Response::ok(name, format!("Trajectory with {} waypoint(s) queued", waypoints))
            }
            Request::Stop => {
                self.stop().await?;
                Response::ok(name, "Robot stopped")
            }
            Request::ForwardKinematics { positions } => {
                let pose = self.forward_kinematics(&positions)?;
                Response::ok(name, "Forward kinematics computed").with_data(&pose)
            }
            Request::InverseKinematics { pose } => {
                let positions = self.inverse_kinematics(&pose)?;
                Response::ok(name, "Inverse kinematics computed").with_data(&positions)
            }
            Request::StartFreedrive { free_axes } => {
                self.start_freedrive(&free_axes)?;
                Response::ok(name, "Freedrive mode started")
            }
            Request::StopFreedrive => {
                self.stop_freedrive()?;
                Response::ok(name, "Freedrive mode stopped")
            }
            Request::ZeroFtSensor => {
                self.zero_ft_sensor()?;
                Response::ok(name, "Force/torque sensor zeroed")
            }
            Request::SafetyStatus => {
                let status = self.safety_status()?;
                Response::ok(name, status.safety_mode_label.clone()).with_data(&status)
            }
            Request::KinematicState => Response::ok(name, "Kinematic state").with_data(&self.kinematic_state()),
            Request::Gripper(msg) => {
                let status = self.move_gripper(&msg).await?;
                Response::ok(name, format!("Gripper stopped: {:?}", status)).with_data(&status)
            }
        };
        Ok(response)
    }

    pub fn submit_joint_goal(&self, msg: JointGoalMsg) -> Result<()> {
        let goal = JointGoal::try_from(msg)?;
        let current = self.executor.kinematic_state().joint_positions;
        self.planner.plan(&current, &goal.positions, goal.duration)?;
        self.executor.submit(MotionGoal::Joint(goal));
        Ok(())
    }

    pub fn submit_cartesian_goal(&self, msg: CartesianGoalMsg) -> Result<()> {
        let goal = CartesianGoal::from(msg);
        if !goal.pose.is_well_formed() {
            return Err(MotionError::Validation(
                "pose has non-finite values or a zero quaternion".to_string(),
            ));
        }
        if !(goal.velocity.is_finite() && goal.velocity > 0.0) {
            return Err(MotionError::Validation(format!(
                "velocity must be positive, got {}",
                goal.velocity
            )));
        }
        self.inverse_kinematics(&goal.pose)?;
        self.executor.submit(MotionGoal::Cartesian(goal));
        Ok(())
    }

    /// Queue a trajectory, returning its waypoint count.
    pub fn submit_trajectory(&self, msg: TrajectoryMsg) -> Result<usize> {
        let goal = MotionGoal::try_from(msg)?;
        let MotionGoal::Trajectory(waypoints) = &goal else {
            return Err(MotionError::Validation("expected a trajectory".to_string()));
        };
        if waypoints.is_empty() {
            return Err(MotionError::Validation("trajectory has no waypoints".to_string()));
        }
        let limits = self.planner.limits().joint_limits;
        for (i, waypoint) in waypoints.iter().enumerate() {
            if let Some(joint) = first_limit_violation(&waypoint.positions, &limits) {
                return Err(MotionError::Validation(format!(
                    "waypoint {} exceeds limit of joint {}",
                    i, joint
                )));
            }
        }
        let count = waypoints.len();
        self.executor.submit(goal);
        Ok(count)
    }

    /// Stop all motion, resolving once the control loop has issued the stop.
    pub async fn stop(&self) -> Result<()> {
        info!("Stop requested");
        let outcome = self.executor.request_stop()?;
        match outcome.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(MotionError::CommandRejected(message)),
            Err(_) => Err(MotionError::Driver("control loop exited before stopping".to_string())),
        }
    }

    pub fn forward_kinematics(&self, positions: &[f64]) -> Result<CartesianPose> {
        let q = joint_vector_from_slice(positions, "positions")?;
        self.kinematics.forward_kinematics(&q)
    }

    pub fn inverse_kinematics(&self, pose: &CartesianPose) -> Result<JointVector> {
        if !pose.is_well_formed() {
            return Err(MotionError::Validation(
                "pose has non-finite values or a zero quaternion".to_string(),
            ));
        }
        let q = self.kinematics.inverse_kinematics(pose)?;
        if let Some(joint) = first_limit_violation(&q, &self.planner.limits().joint_limits) {
            return Err(MotionError::KinematicUnreachable(format!(
                "solution exceeds limit of joint {}",
                joint
            )));
        }
        Ok(q)
    }

    pub fn start_freedrive(&self, free_axes: &[i32]) -> Result<()> {
        let axes = free_axes_from_slice(free_axes)?;
        info!("Starting freedrive with free axes {:?}", axes);
        self.driver.freedrive_mode(&axes)
    }

    pub fn stop_freedrive(&self) -> Result<()> {
        info!("Stopping freedrive");
        self.driver.end_freedrive_mode()
    }

    pub fn zero_ft_sensor(&self) -> Result<()> {
        self.driver.zero_ft_sensor()
    }

    pub fn safety_status(&self) -> Result<SafetyStatus> {
        SafetyStatus::read(self.driver.as_ref())
    }

    pub fn kinematic_state(&self) -> KinematicState {
        self.executor.kinematic_state()
    }

    /// Run a blocking gripper move off the async runtime.
    pub async fn move_gripper(&self, msg: &GripperCommandMsg) -> Result<ObjectStatus> {
        let gripper = self
            .gripper
            .clone()
            .ok_or_else(|| MotionError::Validation("gripper is not enabled".to_string()))?;
        let command = GripperCommand::try_from(msg)?;
        tokio::task::spawn_blocking(move || gripper.move_and_wait(&command)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use crate::executor::MotionExecutor;
    use crate::gripper::SimulatedGripper;
    use crate::kinematics::forward_kinematics;
    use crate::messages::TrajectoryPointMsg;
    use crate::sim::{DriverCall, SimulatedDriver};

    fn setup(q: JointVector) -> (Arc<SimulatedDriver>, MotionExecutor, ControlInterface, Arc<SimulatedGripper>) {
        let driver = Arc::new(SimulatedDriver::new(q));
        let config = ControlConfig::default();
        let (mut executor, link, _executed) = MotionExecutor::new(driver.clone(), &config);
        executor.tick().unwrap();
        let gripper = Arc::new(SimulatedGripper::new());
        let interface = ControlInterface::new(
            driver.clone(),
            link,
            config.motion_limits(),
            Some(gripper.clone() as Arc<dyn GripperDriver>),
        );
        (driver, executor, interface, gripper)
    }

    fn request(value: serde_json::Value) -> Request {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn joint_goal_is_validated_then_executed() {
        let (driver, mut executor, interface, _) = setup([0.0; 6]);

        let rejected = interface
            .handle(request(serde_json::json!({"type": "joint_goal", "positions": [0.1, 0.1, 0.1, 0.1, 0.1, 0.1], "duration": 0.0})))
            .await;
        assert!(!rejected.success);
        let short = interface
            .handle(request(serde_json::json!({"type": "joint_goal", "positions": [0.1, 0.1, 0.1, 0.1, 0.1], "duration": 1.0})))
            .await;
        assert!(!short.success);

        let accepted = interface
            .handle(request(serde_json::json!({"type": "joint_goal", "positions": [0.1, 0.1, 0.1, 0.1, 0.1, 0.1], "duration": 2.0})))
            .await;
        assert!(accepted.success, "{}", accepted.message);
        executor.tick().unwrap();
        assert!(matches!(driver.calls()[0], DriverCall::MoveJ { .. }));
    }

    #[tokio::test]
    async fn stop_resolves_after_the_control_loop_runs() {
        let (driver, mut executor, interface, _) = setup([0.0; 6]);
        let pending = tokio::spawn({
            let interface = interface.clone();
            async move { interface.handle(Request::Stop).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        executor.tick().unwrap();
        let response = pending.await.unwrap();
        assert!(response.success);
        assert_eq!(driver.calls(), vec![DriverCall::SpeedStop(2.0)]);
    }

    #[tokio::test]
    async fn stop_fails_when_control_loop_is_gone() {
        let (_driver, executor, interface, _) = setup([0.0; 6]);
        drop(executor);
        let response = interface.handle(Request::Stop).await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn kinematics_queries_round_trip() {
        let q = [0.3, -1.2, 1.5, -0.4, 1.1, 0.7];
        let (_driver, _executor, interface, _) = setup(q);

        let fk = interface.forward_kinematics(&q).unwrap();
        let expected = forward_kinematics(&q).translation.vector;
        assert!((fk.position.z - expected.z).abs() < 1e-9);

        let response = interface.handle(Request::InverseKinematics { pose: fk }).await;
        assert!(response.success);
        let solved: Vec<f64> = serde_json::from_value(response.data.unwrap()).unwrap();
        for (a, b) in solved.iter().zip(q.iter()) {
            assert!((a - b).abs() < 1e-6);
        }

        let mut far = CartesianPose::identity();
        far.position.x = 5.0;
        let unreachable = interface.inverse_kinematics(&far).unwrap_err();
        assert!(matches!(unreachable, MotionError::KinematicUnreachable(_)));
    }

    #[tokio::test]
    async fn trajectory_requests_check_every_waypoint() {
        let (_driver, _executor, interface, _) = setup([0.0; 6]);
        let bad = TrajectoryMsg {
            points: vec![
                TrajectoryPointMsg { positions: vec![0.1; 6], ..Default::default() },
                TrajectoryPointMsg { positions: vec![0.0, 0.0, 3.5, 0.0, 0.0, 0.0], ..Default::default() },
            ],
        };
        let response = interface.handle(Request::Trajectory(bad)).await;
        assert!(!response.success);
        assert!(response.message.contains("waypoint 1"));
        assert!(!interface.handle(Request::Trajectory(TrajectoryMsg::default())).await.success);
    }

    #[tokio::test]
    async fn freedrive_and_safety_services() {
        let (driver, _executor, interface, _) = setup([0.0; 6]);
        assert!(interface.handle(request(serde_json::json!({"type": "start_freedrive", "free_axes": [1, 1, 1, 0, 0, 0]}))).await.success);
        assert_eq!(driver.freedrive_axes(), Some([true, true, true, false, false, false]));
        assert!(!interface.handle(request(serde_json::json!({"type": "start_freedrive", "free_axes": [1, 1]}))).await.success);
        assert!(interface.handle(Request::StopFreedrive).await.success);
        assert!(interface.handle(Request::ZeroFtSensor).await.success);

        driver.set_safety(7, 2, 0b100);
        let response = interface.handle(Request::SafetyStatus).await;
        assert_eq!(response.message, "PROTECTIVE_STOP");
        let status: SafetyStatus = serde_json::from_value(response.data.unwrap()).unwrap();
        assert_eq!(status.robot_mode_label, "ROBOT_MODE_RUNNING");
        assert_eq!(status.safety_status_labels, vec!["Is protective stopped".to_string()]);
    }

    #[tokio::test]
    async fn gripper_percentages_are_normalised() {
        let (_driver, _executor, interface, gripper) = setup([0.0; 6]);
        let response = interface
            .handle(Request::Gripper(GripperCommandMsg { position: 100.0, speed: 50.0, force: 25.0 }))
            .await;
        assert!(response.success, "{}", response.message);
        assert_eq!(response.data, Some(serde_json::json!("AT_DESTINATION")));
        assert_eq!(gripper.moves()[0].speed, 0.5);
    }
}
