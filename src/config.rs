//! Configuration loading for the motion controller

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use crate::planner::MotionLimits;
use crate::types::JointVector;
use crate::{MotionError, Result};

pub const DEFAULT_ROBOT_HOST: &str = "192.168.2.30";
pub const DEFAULT_RTDE_PORT: u16 = 30004;
pub const DEFAULT_SCRIPT_PORT: u16 = 30002;
pub const DEFAULT_GRIPPER_PORT: u16 = 63352;

/// Maximum joint acceleration used by joint-space goals, rad/s^2.
pub const ACCELERATION: f64 = 1.4;
/// Maximum cruise velocity a planned joint move may request, rad/s.
pub const JOINT_VELOCITY_MAX: f64 = 2.0;
/// Symmetric position limits per joint, rad. The elbow is mechanically limited to +-pi.
pub const JOINT_LIMIT: JointVector = [2.0 * PI, 2.0 * PI, PI, 2.0 * PI, 2.0 * PI, 2.0 * PI];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rtde_port")]
    pub rtde_port: u16,
    #[serde(default = "default_script_port")]
    pub script_port: u16,
    /// Tool center point offset from the flange, [x, y, z, rx, ry, rz].
    #[serde(default)]
    pub tcp_offset: [f64; 6],
    pub gripper: Option<GripperConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GripperConfig {
    #[serde(default)]
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    #[serde(default = "default_joint_velocity_max")]
    pub joint_velocity_max: f64,
    #[serde(default = "default_joint_limits")]
    pub joint_limits: JointVector,
    #[serde(default = "default_stop_deceleration")]
    pub stop_deceleration: f64,
    /// Joint speed used for each streamed trajectory waypoint.
    #[serde(default = "default_trajectory_speed")]
    pub trajectory_speed: f64,
    #[serde(default = "default_acceleration")]
    pub trajectory_acceleration: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishingConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Upper bound on how often the console publisher prints samples.
    pub console_rate_hz: Option<u32>,
}

fn default_host() -> String {
    DEFAULT_ROBOT_HOST.to_string()
}
fn default_rtde_port() -> u16 {
    DEFAULT_RTDE_PORT
}
fn default_script_port() -> u16 {
    DEFAULT_SCRIPT_PORT
}
fn default_rate_hz() -> u32 {
    500
}
fn default_acceleration() -> f64 {
    ACCELERATION
}
fn default_joint_velocity_max() -> f64 {
    JOINT_VELOCITY_MAX
}
fn default_joint_limits() -> JointVector {
    JOINT_LIMIT
}
fn default_stop_deceleration() -> f64 {
    2.0
}
fn default_trajectory_speed() -> f64 {
    1.05
}
fn default_topic_prefix() -> String {
    "ur_rtde".to_string()
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            rtde_port: DEFAULT_RTDE_PORT,
            script_port: DEFAULT_SCRIPT_PORT,
            tcp_offset: [0.0; 6],
            gripper: None,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            acceleration: ACCELERATION,
            joint_velocity_max: JOINT_VELOCITY_MAX,
            joint_limits: JOINT_LIMIT,
            stop_deceleration: default_stop_deceleration(),
            trajectory_speed: default_trajectory_speed(),
            trajectory_acceleration: ACCELERATION,
        }
    }
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            topic_prefix: default_topic_prefix(),
            console_rate_hz: None,
        }
    }
}

impl GripperConfig {
    /// Gripper host, falling back to the robot host (the gripper URCap listens on the controller).
    pub fn host<'a>(&'a self, robot_host: &'a str) -> &'a str {
        self.host.as_deref().unwrap_or(robot_host)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_GRIPPER_PORT)
    }
}

impl PublishingConfig {
    pub fn console_rate_hz(&self) -> u32 {
        self.console_rate_hz.unwrap_or(10)
    }
}

impl ControlConfig {
    pub fn motion_limits(&self) -> MotionLimits {
        MotionLimits {
            joint_limits: self.joint_limits,
            acceleration: self.acceleration,
            joint_velocity_max: self.joint_velocity_max,
        }
    }
}

impl ControllerConfig {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| MotionError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: ControllerConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let control = &self.control;
        if control.rate_hz == 0 || self.publishing.rate_hz == 0 {
            return Err(MotionError::Config("rates must be greater than zero".to_string()));
        }
        let positive = [
            ("acceleration", control.acceleration),
            ("joint_velocity_max", control.joint_velocity_max),
            ("stop_deceleration", control.stop_deceleration),
            ("trajectory_speed", control.trajectory_speed),
            ("trajectory_acceleration", control.trajectory_acceleration),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MotionError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if let Some(i) = control.joint_limits.iter().position(|l| !(l.is_finite() && *l > 0.0)) {
            return Err(MotionError::Config(format!(
                "joint limit {} must be positive, got {}",
                i, control.joint_limits[i]
            )));
        }
        Ok(())
    }

    pub fn gripper(&self) -> Option<&GripperConfig> {
        self.robot.gripper.as_ref().filter(|g| g.enabled)
    }
}
