//! Controller lifecycle
//!
//! Owns the driver, the control thread and the telemetry threads. Startup order is
//! driver connect, request interface registration, telemetry loops, control loop.
//! Shutdown order is signal, join telemetry, join control, final stop, disconnect.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::driver::RobotDriver;
use crate::executor::MotionExecutor;
use crate::gripper::{GripperDriver, RobotiqGripper};
use crate::interface::ControlInterface;
use crate::signal::ShutdownSignal;
use crate::telemetry::{sample_joint_state, sample_tcp_pose, sample_wrench, spawn_telemetry_loop, TelemetryStreams};
use crate::ur_driver::UrDriver;
use crate::{MotionError, Result};

pub struct Controller {
    config: ControllerConfig,
    driver: Arc<dyn RobotDriver>,
    gripper: Option<Arc<dyn GripperDriver>>,
    interface: ControlInterface,
    shutdown: ShutdownSignal,
    telemetry_threads: Vec<JoinHandle<()>>,
    control_thread: Option<JoinHandle<Result<()>>>,
    telemetry_streams: Option<TelemetryStreams>,
    finished: bool,
}

impl Controller {
    /// Connect to the robot (and gripper, when enabled) described by `config`, then start.
    pub fn connect(config: ControllerConfig) -> Result<Self> {
        info!("Connecting to robot at {}", config.robot.host);
        let driver: Arc<dyn RobotDriver> = Arc::new(UrDriver::connect(&config)?);
        let gripper = match config.gripper() {
            Some(gripper_config) => {
                let host = gripper_config.host(&config.robot.host).to_string();
                match RobotiqGripper::connect(&host, gripper_config.port()) {
                    Ok(gripper) => Some(Arc::new(gripper) as Arc<dyn GripperDriver>),
                    Err(e) => {
                        release(driver.as_ref(), None);
                        return Err(e);
                    }
                }
            }
            None => None,
        };
        let started = Self::start(config, driver.clone(), gripper.clone());
        if started.is_err() {
            release(driver.as_ref(), gripper.as_deref());
        }
        started
    }

    /// Start the controller on an already connected driver.
    pub fn start(
        config: ControllerConfig,
        driver: Arc<dyn RobotDriver>,
        gripper: Option<Arc<dyn GripperDriver>>,
    ) -> Result<Self> {
        config.validate()?;
        let shutdown = ShutdownSignal::new();

        let (executor, link, executed) = MotionExecutor::new(driver.clone(), &config.control);
        executor.refresh_kinematic_state()?;
        let interface = ControlInterface::new(driver.clone(), link, config.control.motion_limits(), gripper.clone());

        let rate_hz = config.publishing.rate_hz;
        let control_rate = config.control.rate_hz;
        let (joint_tx, joint_state) = watch::channel(None);
        let (pose_tx, tcp_pose) = watch::channel(None);
        let (wrench_tx, wrench) = watch::channel(None);

        let mut telemetry_threads = Vec::with_capacity(3);
        let spawned = (|| -> std::io::Result<JoinHandle<Result<()>>> {
            let sampler = driver.clone();
            telemetry_threads.push(spawn_telemetry_loop("joint_state", rate_hz, shutdown.clone(), joint_tx, move || {
                sample_joint_state(sampler.as_ref())
            })?);
            let sampler = driver.clone();
            telemetry_threads.push(spawn_telemetry_loop("tcp_pose", rate_hz, shutdown.clone(), pose_tx, move || {
                sample_tcp_pose(sampler.as_ref())
            })?);
            let sampler = driver.clone();
            telemetry_threads.push(spawn_telemetry_loop("wrench", rate_hz, shutdown.clone(), wrench_tx, move || {
                sample_wrench(sampler.as_ref())
            })?);

            let control_shutdown = shutdown.clone();
            thread::Builder::new()
                .name("control-loop".to_string())
                .spawn(move || executor.run(control_shutdown, control_rate))
        })();
        let control_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start controller threads: {}", e);
                shutdown.trigger();
                join_telemetry(&mut telemetry_threads);
                return Err(e.into());
            }
        };

        info!(
            "Controller started: control {} Hz, telemetry {} Hz",
            control_rate, rate_hz
        );
        Ok(Self {
            config,
            driver,
            gripper,
            interface,
            shutdown,
            telemetry_threads,
            control_thread: Some(control_thread),
            telemetry_streams: Some(TelemetryStreams {
                joint_state,
                tcp_pose,
                wrench,
                executed,
            }),
            finished: false,
        })
    }

    pub fn interface(&self) -> ControlInterface {
        self.interface.clone()
    }

    /// Telemetry receivers; available once.
    pub fn take_telemetry_streams(&mut self) -> Option<TelemetryStreams> {
        self.telemetry_streams.take()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    /// Stop every loop, bring the arm to rest and release the driver.
    ///
    /// Returns the control loop's fatal error, if it died of one. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        info!("Shutting down controller");
        self.shutdown.trigger();

        join_telemetry(&mut self.telemetry_threads);

        let control_result = match self.control_thread.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(MotionError::Driver("control thread panicked".to_string())),
            None => Ok(()),
        };

        if let Err(e) = self.driver.stop_j(self.config.control.stop_deceleration) {
            error!("Final stop failed: {}", e);
        }
        if let Some(gripper) = &self.gripper {
            if let Err(e) = gripper.disconnect() {
                warn!("Gripper disconnect failed: {}", e);
            }
        }
        self.driver.disconnect()?;
        info!("Controller shutdown complete");
        control_result
    }
}

fn join_telemetry(threads: &mut Vec<JoinHandle<()>>) {
    for handle in threads.drain(..) {
        if handle.join().is_err() {
            warn!("Telemetry thread panicked");
        }
    }
}

/// Release connections opened for a controller that never started.
fn release(driver: &dyn RobotDriver, gripper: Option<&dyn GripperDriver>) {
    if let Some(gripper) = gripper {
        if let Err(e) = gripper.disconnect() {
            warn!("Gripper disconnect failed: {}", e);
        }
    }
    if let Err(e) = driver.disconnect() {
        warn!("Driver disconnect failed: {}", e);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Controller shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GripperConfig;
    use crate::messages::{JointGoalMsg, Request};
    use crate::rtde::fake;
    use crate::sim::{DriverCall, SimulatedDriver};
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    /// Fake controller; the script side reports whether its socket was closed.
    fn fake_robot() -> (ControllerConfig, JoinHandle<()>, JoinHandle<std::io::Result<String>>) {
        let rtde_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let script_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = ControllerConfig::default();
        config.robot.host = "127.0.0.1".to_string();
        config.robot.rtde_port = rtde_listener.local_addr().unwrap().port();
        config.robot.script_port = script_listener.local_addr().unwrap().port();

        let rtde = fake::serve(rtde_listener, [0.0, -1.5, 1.5, 0.0, 1.5, 0.0], 1000);
        let script = thread::spawn(move || {
            let (mut stream, _) = script_listener.accept()?;
            stream.set_read_timeout(Some(Duration::from_secs(2)))?;
            let mut received = String::new();
            stream.read_to_string(&mut received)?;
            Ok(received)
        });
        (config, rtde, script)
    }

    #[test]
    fn failed_gripper_connect_releases_the_robot() {
        let (mut config, rtde, script) = fake_robot();
        let closed = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);
        config.robot.gripper = Some(GripperConfig { enabled: true, host: None, port: Some(port) });

        assert!(Controller::connect(config).is_err());
        assert!(script.join().unwrap().is_ok(), "script socket left open");
        rtde.join().unwrap();
    }

    #[test]
    fn failed_start_releases_the_robot() {
        let (mut config, rtde, script) = fake_robot();
        config.control.rate_hz = 0;

        assert!(matches!(Controller::connect(config), Err(MotionError::Config(_))));
        assert!(script.join().unwrap().is_ok(), "script socket left open");
        rtde.join().unwrap();
    }

    fn start_sim() -> (Arc<SimulatedDriver>, Controller) {
        let driver = Arc::new(SimulatedDriver::new([0.0; 6]));
        let controller = Controller::start(ControllerConfig::default(), driver.clone(), None).unwrap();
        (driver, controller)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn shutdown_stops_before_disconnecting() {
        let (driver, mut controller) = start_sim();
        assert!(controller.is_running());
        controller.shutdown().unwrap();
        assert!(!controller.is_running());

        let calls = driver.calls();
        let n = calls.len();
        assert!(n >= 2);
        assert_eq!(calls[n - 2], DriverCall::StopJ(2.0));
        assert_eq!(calls[n - 1], DriverCall::Disconnect);

        controller.shutdown().unwrap();
        assert_eq!(driver.calls().len(), n);
    }

    #[tokio::test]
    async fn goals_reach_the_driver_through_the_interface() {
        let (driver, mut controller) = start_sim();
        let response = controller
            .interface()
            .handle(Request::JointGoal(JointGoalMsg { positions: vec![0.2; 6], duration: 2.0 }))
            .await;
        assert!(response.success, "{}", response.message);
        assert!(wait_until(|| driver.calls().iter().any(DriverCall::is_motion)));

        let mut streams = controller.take_telemetry_streams().unwrap();
        assert!(controller.take_telemetry_streams().is_none());
        let executed = tokio::time::timeout(Duration::from_secs(2), streams.executed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(executed.goal, "joint");

        let stop = controller.interface().handle(Request::Stop).await;
        assert!(stop.success);
        controller.shutdown().unwrap();
    }

    #[test]
    fn telemetry_threads_publish_samples() {
        let (_driver, mut controller) = start_sim();
        let streams = controller.take_telemetry_streams().unwrap();
        assert!(wait_until(|| streams.joint_state.borrow().is_some()));
        assert!(wait_until(|| streams.wrench.borrow().is_some()));
        assert!(wait_until(|| streams.tcp_pose.borrow().is_some()));
        controller.shutdown().unwrap();
    }

    #[test]
    fn driver_loss_triggers_shutdown() {
        let (driver, mut controller) = start_sim();
        driver.sever_connection();
        assert!(wait_until(|| !controller.is_running()));
        let err = controller.shutdown().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(driver.calls().last(), Some(&DriverCall::Disconnect));
    }
}
