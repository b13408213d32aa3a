//! Error types for motion command execution

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MotionError>;

#[derive(Error, Debug)]
pub enum MotionError {
    /// Malformed or out-of-limit input. The goal is dropped and the executor stays idle.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Planned cruise velocity is above the configured joint velocity limit.
    #[error("Velocity {requested:.4} rad/s exceeds joint velocity limit {max:.4} rad/s")]
    VelocityLimitExceeded { requested: f64, max: f64 },

    /// Inverse kinematics found no joint configuration for the requested pose.
    #[error("Kinematically unreachable: {0}")]
    KinematicUnreachable(String),

    /// The driver refused a command but the connection is still healthy.
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Connection or communication failure with the robot driver.
    #[error("Driver failure: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MotionError {
    /// Fatal errors stop the control loop and start the shutdown sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MotionError::Driver(_))
    }
}
