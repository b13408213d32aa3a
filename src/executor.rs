//! Motion executor
//!
//! Single-threaded state machine driven by a fixed-rate tick. Each tick refreshes
//! the kinematic state, services stop requests, picks up the newest pending goal
//! and, while a trajectory is active, sends exactly one waypoint to the driver.

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::ControlConfig;
use crate::driver::RobotDriver;
use crate::goal::{CartesianGoal, GoalSlot, JointGoal, MotionGoal, Waypoint};
use crate::messages::TrajectoryExecutedData;
use crate::planner::TrapezoidalPlanner;
use crate::pose::{to_cartesian, to_native};
use crate::rate::Rate;
use crate::signal::ShutdownSignal;
use crate::types::{current_timestamp, first_limit_violation, KinematicState};
use crate::{MotionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    ExecutingSingleGoal,
    ExecutingTrajectory,
    Stopped,
}

/// Result delivered to whoever asked for a stop.
pub type StopOutcome = std::result::Result<(), String>;

pub struct StopRequest {
    pub reply: oneshot::Sender<StopOutcome>,
}

/// Producer side of the executor: goal submission, stop requests, state snapshots.
#[derive(Clone)]
pub struct ExecutorLink {
    goals: Arc<GoalSlot>,
    stop_sender: Sender<StopRequest>,
    kinematic_state: Arc<ArcSwap<KinematicState>>,
}

impl ExecutorLink {
    /// Queue `goal`, replacing any goal the control loop has not picked up yet.
    pub fn submit(&self, goal: MotionGoal) {
        debug!("Submitting {} goal", goal.kind());
        self.goals.submit(goal);
    }

    /// Ask the control loop to stop; the receiver resolves once the stop was issued.
    pub fn request_stop(&self) -> Result<oneshot::Receiver<StopOutcome>> {
        let (reply, outcome) = oneshot::channel();
        self.stop_sender
            .send(StopRequest { reply })
            .map_err(|_| MotionError::Driver("control loop is not running".to_string()))?;
        Ok(outcome)
    }

    pub fn kinematic_state(&self) -> KinematicState {
        self.kinematic_state.load_full().as_ref().clone()
    }
}

pub struct MotionExecutor {
    driver: Arc<dyn RobotDriver>,
    planner: TrapezoidalPlanner,
    goals: Arc<GoalSlot>,
    stop_requests: Receiver<StopRequest>,
    kinematic_state: Arc<ArcSwap<KinematicState>>,
    notifications: mpsc::UnboundedSender<TrajectoryExecutedData>,
    state: ExecutorState,
    trajectory: VecDeque<Waypoint>,
    trajectory_length: usize,
    stop_deceleration: f64,
    trajectory_speed: f64,
    trajectory_acceleration: f64,
}

impl MotionExecutor {
    /// Build the executor together with its producer link and the notification stream.
    pub fn new(
        driver: Arc<dyn RobotDriver>,
        config: &ControlConfig,
    ) -> (Self, ExecutorLink, mpsc::UnboundedReceiver<TrajectoryExecutedData>) {
        let goals = Arc::new(GoalSlot::new());
        let (stop_sender, stop_requests) = channel::unbounded();
        let kinematic_state = Arc::new(ArcSwap::from_pointee(KinematicState::default()));
        let (notifications, executed) = mpsc::unbounded_channel();

        let executor = Self {
            driver,
            planner: TrapezoidalPlanner::new(config.motion_limits()),
            goals: goals.clone(),
            stop_requests,
            kinematic_state: kinematic_state.clone(),
            notifications,
            state: ExecutorState::Idle,
            trajectory: VecDeque::new(),
            trajectory_length: 0,
            stop_deceleration: config.stop_deceleration,
            trajectory_speed: config.trajectory_speed,
            trajectory_acceleration: config.trajectory_acceleration,
        };
        let link = ExecutorLink {
            goals,
            stop_sender,
            kinematic_state,
        };
        (executor, link, executed)
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn remaining_waypoints(&self) -> usize {
        self.trajectory.len()
    }

    /// Run ticks at `rate_hz` until shutdown. A fatal driver error triggers shutdown.
    pub fn run(mut self, shutdown: ShutdownSignal, rate_hz: u32) -> Result<()> {
        info!("Control loop running at {} Hz", rate_hz);
        let mut rate = Rate::from_hz(rate_hz);
        while !shutdown.is_triggered() {
            if let Err(e) = self.tick() {
                error!("Control loop aborted: {}", e);
                shutdown.trigger();
                return Err(e);
            }
            rate.sleep();
        }
        info!("Control loop stopped");
        Ok(())
    }

    /// One control period. Only fatal errors are returned.
    pub fn tick(&mut self) -> Result<()> {
        self.refresh_kinematic_state()?;

        if self.service_stop_requests()? {
            return Ok(());
        }

        if let Some(goal) = self.goals.take() {
            self.dispatch(goal)?;
        }

        if self.state == ExecutorState::ExecutingTrajectory {
            self.step_trajectory()?;
        }
        Ok(())
    }

    pub fn refresh_kinematic_state(&self) -> Result<()> {
        let joint_positions = self.driver.get_actual_q()?;
        let tcp_pose = to_cartesian(&self.driver.get_actual_tcp_pose()?);
        self.kinematic_state.store(Arc::new(KinematicState {
            joint_positions,
            tcp_pose,
            timestamp: current_timestamp(),
        }));
        Ok(())
    }

    fn transition(&mut self, next: ExecutorState) {
        if self.state != next {
            debug!("Executor {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn service_stop_requests(&mut self) -> Result<bool> {
        let mut requests = Vec::new();
        loop {
            match self.stop_requests.try_recv() {
                Ok(request) => requests.push(request),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if requests.is_empty() {
            return Ok(false);
        }

        self.transition(ExecutorState::Stopped);
        let dropped_goal = self.goals.clear();
        let dropped_waypoints = self.trajectory.len();
        self.trajectory.clear();
        info!(
            "Stop requested, discarding {} waypoint(s){}",
            dropped_waypoints,
            if dropped_goal { " and a pending goal" } else { "" }
        );

        let result = self.driver.speed_stop(self.stop_deceleration);
        self.transition(ExecutorState::Idle);

        let outcome: StopOutcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        for request in requests {
            let _ = request.reply.send(outcome.clone());
        }
        self.absorb(result, "stop")?;
        Ok(true)
    }

    /// Pass fatal errors through, log and swallow the rest.
    fn absorb(&self, result: Result<()>, what: &str) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!("{} failed: {}", what, e);
                Ok(())
            }
        }
    }

    fn notify(&self, goal: &str, motions: usize) {
        let data = TrajectoryExecutedData {
            timestamp: current_timestamp(),
            goal: goal.to_string(),
            motions,
        };
        if self.notifications.send(data).is_err() {
            debug!("No listener for trajectory-executed notifications");
        }
    }

    fn dispatch(&mut self, goal: MotionGoal) -> Result<()> {
        match goal {
            MotionGoal::Joint(goal) => self.execute_joint_goal(goal),
            MotionGoal::Cartesian(goal) => self.execute_cartesian_goal(goal),
            MotionGoal::Trajectory(waypoints) => {
                self.start_trajectory(waypoints);
                Ok(())
            }
        }
    }

    fn cancel_trajectory(&mut self) {
        if !self.trajectory.is_empty() {
            warn!("Abandoning trajectory with {} waypoint(s) left", self.trajectory.len());
            self.trajectory.clear();
        }
    }

    fn execute_joint_goal(&mut self, goal: JointGoal) -> Result<()> {
        let current = self.kinematic_state.load().joint_positions;
        let plan = match self.planner.plan(&current, &goal.positions, goal.duration) {
            Ok(plan) => plan,
            Err(e) => {
                error!("Joint goal rejected: {}", e);
                return Ok(());
            }
        };

        self.cancel_trajectory();
        self.transition(ExecutorState::ExecutingSingleGoal);
        let motions = if plan.is_stationary() {
            debug!("Joint goal already reached");
            0
        } else {
            debug!(
                "move_j v={:.4} a={:.4} T={:.3}s to {:?}",
                plan.velocity, plan.acceleration, plan.duration, goal.positions
            );
            let result = self.driver.move_j(&goal.positions, plan.velocity, plan.acceleration);
            if result.is_err() {
                self.transition(ExecutorState::Idle);
                return self.absorb(result, "Joint move");
            }
            1
        };
        self.notify("joint", motions);
        self.transition(ExecutorState::Idle);
        Ok(())
    }

    fn execute_cartesian_goal(&mut self, goal: CartesianGoal) -> Result<()> {
        if !goal.pose.is_well_formed() {
            error!("Cartesian goal rejected: pose has non-finite values or a zero quaternion");
            return Ok(());
        }
        if !(goal.velocity.is_finite() && goal.velocity > 0.0) {
            error!("Cartesian goal rejected: velocity must be positive, got {}", goal.velocity);
            return Ok(());
        }

        // Reachability is the driver's call: move_l rejects poses the arm cannot reach.
        self.cancel_trajectory();
        self.transition(ExecutorState::ExecutingSingleGoal);
        let result = self.driver.move_l(&to_native(&goal.pose), goal.velocity);
        if result.is_err() {
            self.transition(ExecutorState::Idle);
            return self.absorb(result, "Linear move");
        }
        self.notify("cartesian", 1);
        self.transition(ExecutorState::Idle);
        Ok(())
    }

    fn start_trajectory(&mut self, waypoints: Vec<Waypoint>) {
        if waypoints.is_empty() {
            error!("Trajectory rejected: no waypoints");
            return;
        }
        let limits = self.planner.limits().joint_limits;
        for (i, waypoint) in waypoints.iter().enumerate() {
            if let Some(joint) = first_limit_violation(&waypoint.positions, &limits) {
                error!("Trajectory rejected: waypoint {} exceeds limit of joint {}", i, joint);
                return;
            }
        }

        self.cancel_trajectory();
        info!("Executing trajectory with {} waypoint(s)", waypoints.len());
        self.trajectory_length = waypoints.len();
        self.trajectory = waypoints.into();
        self.transition(ExecutorState::ExecutingTrajectory);
    }

    fn step_trajectory(&mut self) -> Result<()> {
        let Some(waypoint) = self.trajectory.pop_front() else {
            self.transition(ExecutorState::Idle);
            return Ok(());
        };

        let result = self.driver.move_j(&waypoint.positions, self.trajectory_speed, self.trajectory_acceleration);
        if result.is_err() {
            self.trajectory.clear();
            self.transition(ExecutorState::Idle);
            return self.absorb(result, "Trajectory waypoint");
        }

        if self.trajectory.is_empty() {
            self.transition(ExecutorState::Idle);
            info!("Trajectory executed");
            self.notify("trajectory", self.trajectory_length);
            let stop = self.driver.stop_j(self.stop_deceleration);
            self.absorb(stop, "Trajectory stop")?;
        }
        Ok(())
    }
}
