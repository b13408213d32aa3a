//! URMC - real-time motion command executor for Universal Robots arms
//!
//! Accepts joint-space goals, Cartesian goals and streamed joint trajectories,
//! validates and plans them, and drives the arm through a [`RobotDriver`] while
//! publishing joint state, TCP pose and wrench telemetry.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use urmc::{Controller, ControllerConfig, Request, SimulatedDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Arc::new(SimulatedDriver::new([0.0, -1.57, 1.57, 0.0, 1.57, 0.0]));
//!     let mut controller = Controller::start(ControllerConfig::default(), driver, None)?;
//!
//!     let request: Request = serde_json::from_str(
//!         r#"{"type":"joint_goal","positions":[0.2,-1.5,1.5,0.0,1.57,0.0],"duration":2.0}"#,
//!     )?;
//!     let response = controller.interface().handle(request).await;
//!     println!("{}: {}", response.success, response.message);
//!
//!     controller.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Controller**: lifecycle, owns the control thread and telemetry threads
//! - **MotionExecutor**: fixed-rate state machine turning goals into driver calls
//! - **TrapezoidalPlanner**: velocity/acceleration for single joint moves
//! - **KinematicModel**: FK/IK and the UR10e Jacobian derivative term
//! - **ControlInterface**: request/response front door for every transport
//! - **TelemetryPublisher**: transport-agnostic telemetry sink

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod executor;
pub mod goal;
pub mod gripper;
pub mod interface;
pub mod kinematics;
pub mod messages;
pub mod planner;
pub mod pose;
pub mod rate;
pub mod rtde;
pub mod safety;
pub mod signal;
pub mod sim;
pub mod stream;
pub mod telemetry;
pub mod trajectory;
pub mod types;
pub mod ur_driver;
#[cfg(feature = "zenoh-integration")]
pub mod zenoh_transport;

pub use config::{ControlConfig, ControllerConfig, PublishingConfig, RobotConfig};
pub use controller::Controller;
pub use driver::RobotDriver;
pub use error::{MotionError, Result};
pub use executor::{ExecutorLink, ExecutorState, MotionExecutor};
pub use goal::{CartesianGoal, JointGoal, MotionGoal, Waypoint};
pub use gripper::{GripperDriver, ObjectStatus, RobotiqGripper, SimulatedGripper};
pub use interface::ControlInterface;
pub use kinematics::KinematicModel;
pub use messages::{Request, Response};
pub use planner::{MotionLimits, PlannedMove, TrapezoidalPlanner};
pub use pose::{to_cartesian, to_native, CartesianPose, NativePose};
pub use safety::SafetyStatus;
pub use signal::ShutdownSignal;
pub use sim::SimulatedDriver;
pub use stream::CommandStream;
pub use telemetry::{ConsoleTelemetry, NoOpTelemetry, TelemetryPublisher};
pub use types::{JointVector, KinematicState};
pub use ur_driver::UrDriver;
