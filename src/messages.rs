//! Wire messages exchanged with transports
//!
//! Inbound goal messages carry plain `Vec<f64>` fields so that malformed lengths
//! can be reported instead of failing deserialization; conversion into the typed
//! goals in [`crate::goal`] performs that validation.

use serde::{Deserialize, Serialize};

use crate::goal::{CartesianGoal, JointGoal, MotionGoal, Waypoint};
use crate::pose::CartesianPose;
use crate::types::{joint_vector_from_slice, JointVector, JointVelocity, Wrench};
use crate::{MotionError, Result};

/// Joint-space goal: target positions reached in `duration` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointGoalMsg {
    pub positions: Vec<f64>,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartesianGoalMsg {
    pub pose: CartesianPose,
    pub velocity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPointMsg {
    pub positions: Vec<f64>,
    #[serde(default)]
    pub velocities: Vec<f64>,
    #[serde(default)]
    pub accelerations: Vec<f64>,
    #[serde(default)]
    pub effort: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMsg {
    pub points: Vec<TrajectoryPointMsg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperCommandMsg {
    /// Opening in percent, 0 (open) to 100 (closed).
    pub position: f64,
    pub speed: f64,
    pub force: f64,
}

/// Every request a transport can forward to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    JointGoal(JointGoalMsg),
    CartesianGoal(CartesianGoalMsg),
    Trajectory(TrajectoryMsg),
    Stop,
    ForwardKinematics { positions: Vec<f64> },
    InverseKinematics { pose: CartesianPose },
    StartFreedrive { free_axes: Vec<i32> },
    StopFreedrive,
    ZeroFtSensor,
    SafetyStatus,
    KinematicState,
    Gripper(GripperCommandMsg),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::JointGoal(_) => "joint_goal",
            Request::CartesianGoal(_) => "cartesian_goal",
            Request::Trajectory(_) => "trajectory",
            Request::Stop => "stop",
            Request::ForwardKinematics { .. } => "forward_kinematics",
            Request::InverseKinematics { .. } => "inverse_kinematics",
            Request::StartFreedrive { .. } => "start_freedrive",
            Request::StopFreedrive => "stop_freedrive",
            Request::ZeroFtSensor => "zero_ft_sensor",
            Request::SafetyStatus => "safety_status",
            Request::KinematicState => "kinematic_state",
            Request::Gripper(_) => "gripper",
        }
    }
}

/// Outcome of a request: always a success flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn ok(request: &str, message: impl Into<String>) -> Self {
        Self {
            request: request.to_string(),
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failed(request: &str, message: impl Into<String>) -> Self {
        Self {
            request: request.to_string(),
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(e) => {
                self.success = false;
                self.message = format!("Failed to encode response data: {}", e);
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointStateData {
    pub timestamp: f64,
    pub position: JointVector,
    pub velocity: JointVelocity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpPoseData {
    pub timestamp: f64,
    pub pose: CartesianPose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrenchData {
    pub timestamp: f64,
    pub force: [f64; 3],
    pub torque: [f64; 3],
}

impl WrenchData {
    pub fn new(timestamp: f64, wrench: &Wrench) -> Self {
        Self {
            timestamp,
            force: [wrench[0], wrench[1], wrench[2]],
            torque: [wrench[3], wrench[4], wrench[5]],
        }
    }
}

/// Emitted once per completed joint, Cartesian or trajectory goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryExecutedData {
    pub timestamp: f64,
    pub goal: String,
    /// Driver calls issued for the goal.
    pub motions: usize,
}

impl TryFrom<JointGoalMsg> for JointGoal {
    type Error = MotionError;

    fn try_from(msg: JointGoalMsg) -> Result<Self> {
        Ok(JointGoal {
            positions: joint_vector_from_slice(&msg.positions, "positions")?,
            duration: msg.duration,
        })
    }
}

impl From<CartesianGoalMsg> for CartesianGoal {
    fn from(msg: CartesianGoalMsg) -> Self {
        CartesianGoal {
            pose: msg.pose,
            velocity: msg.velocity,
        }
    }
}

fn optional_vector(values: &[f64], field: &str) -> Result<Option<JointVector>> {
    if values.is_empty() {
        Ok(None)
    } else {
        joint_vector_from_slice(values, field).map(Some)
    }
}

impl TryFrom<TrajectoryPointMsg> for Waypoint {
    type Error = MotionError;

    fn try_from(msg: TrajectoryPointMsg) -> Result<Self> {
        Ok(Waypoint {
            positions: joint_vector_from_slice(&msg.positions, "positions")?,
            velocities: optional_vector(&msg.velocities, "velocities")?,
            accelerations: optional_vector(&msg.accelerations, "accelerations")?,
            effort: optional_vector(&msg.effort, "effort")?,
        })
    }
}

impl TryFrom<TrajectoryMsg> for MotionGoal {
    type Error = MotionError;

    fn try_from(msg: TrajectoryMsg) -> Result<Self> {
        let waypoints = msg
            .points
            .into_iter()
            .enumerate()
            .map(|(i, point)| {
                Waypoint::try_from(point)
                    .map_err(|e| MotionError::Validation(format!("waypoint {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MotionGoal::Trajectory(waypoints))
    }
}

impl From<&Waypoint> for TrajectoryPointMsg {
    fn from(waypoint: &Waypoint) -> Self {
        let to_vec = |v: &Option<JointVector>| v.map(|v| v.to_vec()).unwrap_or_default();
        Self {
            positions: waypoint.positions.to_vec(),
            velocities: to_vec(&waypoint.velocities),
            accelerations: to_vec(&waypoint.accelerations),
            effort: to_vec(&waypoint.effort),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_type_tag() {
        let request: Request = serde_json::from_value(json!({
            "type": "joint_goal",
            "positions": [0.0, -1.57, 0.0, -1.57, 0.0, 0.0],
            "duration": 2.0
        }))
        .unwrap();
        assert_eq!(request.name(), "joint_goal");

        let stop: Request = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(stop, Request::Stop);

        let freedrive: Request =
            serde_json::from_str(r#"{"type":"start_freedrive","free_axes":[1,1,1,0,0,0]}"#).unwrap();
        assert_eq!(freedrive, Request::StartFreedrive { free_axes: vec![1, 1, 1, 0, 0, 0] });
    }

    #[test]
    fn joint_goal_rejects_wrong_length() {
        let msg = JointGoalMsg { positions: vec![0.0; 5], duration: 1.0 };
        let err = JointGoal::try_from(msg).unwrap_err();
        assert!(matches!(err, MotionError::Validation(_)));
    }

    #[test]
    fn trajectory_points_allow_empty_optional_fields() {
        let msg: TrajectoryMsg = serde_json::from_value(json!({
            "points": [
                {"positions": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]},
                {"positions": [0.1, 0.0, 0.0, 0.0, 0.0, 0.0], "velocities": [0.5, 0.0, 0.0, 0.0, 0.0, 0.0]}
            ]
        }))
        .unwrap();
        match MotionGoal::try_from(msg).unwrap() {
            MotionGoal::Trajectory(points) => {
                assert_eq!(points.len(), 2);
                assert!(points[0].velocities.is_none());
                assert_eq!(points[1].velocities.unwrap()[0], 0.5);
            }
            other => panic!("unexpected goal {:?}", other),
        }
    }

    #[test]
    fn trajectory_error_names_the_waypoint() {
        let msg = TrajectoryMsg {
            points: vec![
                TrajectoryPointMsg { positions: vec![0.0; 6], ..Default::default() },
                TrajectoryPointMsg { positions: vec![0.0; 6], effort: vec![1.0; 3], ..Default::default() },
            ],
        };
        let err = MotionGoal::try_from(msg).unwrap_err();
        assert!(err.to_string().contains("waypoint 1"));
    }

    #[test]
    fn response_serializes_without_empty_data() {
        let json = serde_json::to_value(Response::ok("stop", "stopped")).unwrap();
        assert_eq!(json, json!({"request": "stop", "success": true, "message": "stopped"}));
    }

    #[test]
    fn wrench_splits_force_and_torque() {
        let data = WrenchData::new(1.0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(data.force, [1.0, 2.0, 3.0]);
        assert_eq!(data.torque, [4.0, 5.0, 6.0]);
    }
}
