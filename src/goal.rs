//! Motion goals and the pending-goal handoff slot

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::debug;

use crate::pose::CartesianPose;
use crate::types::JointVector;

#[derive(Debug, Clone, PartialEq)]
pub struct JointGoal {
    pub positions: JointVector,
    /// Requested move duration in seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartesianGoal {
    pub pose: CartesianPose,
    /// Tool speed in m/s.
    pub velocity: f64,
}

/// One sample of a streamed joint trajectory. Only `positions` drives the arm.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub positions: JointVector,
    pub velocities: Option<JointVector>,
    pub accelerations: Option<JointVector>,
    pub effort: Option<JointVector>,
}

impl Waypoint {
    pub fn at(positions: JointVector) -> Self {
        Self {
            positions,
            velocities: None,
            accelerations: None,
            effort: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotionGoal {
    Joint(JointGoal),
    Cartesian(CartesianGoal),
    Trajectory(Vec<Waypoint>),
}

impl MotionGoal {
    pub fn kind(&self) -> &'static str {
        match self {
            MotionGoal::Joint(_) => "joint",
            MotionGoal::Cartesian(_) => "cartesian",
            MotionGoal::Trajectory(_) => "trajectory",
        }
    }
}

/// Single-entry mailbox between goal producers and the control loop.
///
/// A newer goal replaces one that has not been taken yet. Reads and writes swap a
/// whole `Arc`, so the control loop never observes a partially written goal.
#[derive(Default)]
pub struct GoalSlot {
    pending: ArcSwapOption<MotionGoal>,
}

impl GoalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `goal`, returning the unconsumed goal it replaced.
    pub fn submit(&self, goal: MotionGoal) -> Option<Arc<MotionGoal>> {
        let replaced = self.pending.swap(Some(Arc::new(goal)));
        if let Some(previous) = &replaced {
            debug!("Pending {} goal superseded before execution", previous.kind());
        }
        replaced
    }

    /// Remove and return the pending goal.
    pub fn take(&self) -> Option<MotionGoal> {
        self.pending
            .swap(None)
            .map(|goal| Arc::try_unwrap(goal).unwrap_or_else(|shared| (*shared).clone()))
    }

    pub fn clear(&self) -> bool {
        self.pending.swap(None).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.load().is_none()
    }
}
