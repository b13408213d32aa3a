//! Telemetry publication
//!
//! Three sampling loops (joint state, TCP pose, wrench) poll the driver on their own
//! threads at the publishing rate and hand the newest sample to a `watch` channel.
//! [`forward_telemetry`] drains those channels, plus the executor's completion
//! notifications, into any [`TelemetryPublisher`] backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::driver::RobotDriver;
use crate::messages::{JointStateData, TcpPoseData, TrajectoryExecutedData, WrenchData};
use crate::pose::to_cartesian;
use crate::rate::Rate;
use crate::signal::ShutdownSignal;
use crate::types::current_timestamp;
use crate::Result;

/// Backend for robot telemetry, independent of the transport behind it.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish_joint_state(&self, data: &JointStateData) -> anyhow::Result<()>;

    async fn publish_tcp_pose(&self, data: &TcpPoseData) -> anyhow::Result<()>;

    async fn publish_wrench(&self, data: &WrenchData) -> anyhow::Result<()>;

    async fn publish_trajectory_executed(&self, data: &TrajectoryExecutedData) -> anyhow::Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetryPublisher for NoOpTelemetry {
    async fn publish_joint_state(&self, _data: &JointStateData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_tcp_pose(&self, _data: &TcpPoseData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_wrench(&self, _data: &WrenchData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_trajectory_executed(&self, _data: &TrajectoryExecutedData) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Prints telemetry to stdout as tagged JSON lines.
///
/// Periodic streams are throttled to one line per `min_interval` each so a 500 Hz
/// loop does not flood the terminal. Completion notifications are never dropped.
#[derive(Debug)]
pub struct ConsoleTelemetry {
    pub pretty_print: bool,
    min_interval: Duration,
    last_emitted: Mutex<HashMap<&'static str, Instant>>,
}

impl ConsoleTelemetry {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            pretty_print: false,
            min_interval: Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1))),
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn pretty(rate_hz: u32) -> Self {
        Self {
            pretty_print: true,
            ..Self::new(rate_hz)
        }
    }

    fn allow(&self, stream: &'static str) -> bool {
        let now = Instant::now();
        let mut last = self.last_emitted.lock();
        match last.get(stream) {
            Some(previous) if now.duration_since(*previous) < self.min_interval => false,
            _ => {
                last.insert(stream, now);
                true
            }
        }
    }

    fn print<T: serde::Serialize>(&self, tag: &str, data: &T) -> anyhow::Result<()> {
        if self.pretty_print {
            println!("[{}] {}", tag, serde_json::to_string_pretty(data)?);
        } else {
            println!("[{}] {}", tag, serde_json::to_string(data)?);
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryPublisher for ConsoleTelemetry {
    async fn publish_joint_state(&self, data: &JointStateData) -> anyhow::Result<()> {
        if self.allow("joint_state") {
            self.print("JOINT_STATE", data)?;
        }
        Ok(())
    }

    async fn publish_tcp_pose(&self, data: &TcpPoseData) -> anyhow::Result<()> {
        if self.allow("tcp_pose") {
            self.print("TCP_POSE", data)?;
        }
        Ok(())
    }

    async fn publish_wrench(&self, data: &WrenchData) -> anyhow::Result<()> {
        if self.allow("wrench") {
            self.print("WRENCH", data)?;
        }
        Ok(())
    }

    async fn publish_trajectory_executed(&self, data: &TrajectoryExecutedData) -> anyhow::Result<()> {
        self.print("EXECUTED", data)
    }
}

pub fn sample_joint_state(driver: &dyn RobotDriver) -> Result<JointStateData> {
    Ok(JointStateData {
        timestamp: current_timestamp(),
        position: driver.get_actual_q()?,
        velocity: driver.get_actual_qd()?,
    })
}

pub fn sample_tcp_pose(driver: &dyn RobotDriver) -> Result<TcpPoseData> {
    Ok(TcpPoseData {
        timestamp: current_timestamp(),
        pose: to_cartesian(&driver.get_actual_tcp_pose()?),
    })
}

pub fn sample_wrench(driver: &dyn RobotDriver) -> Result<WrenchData> {
    let wrench = driver.get_actual_tcp_force()?;
    Ok(WrenchData::new(current_timestamp(), &wrench))
}

/// Run `sample` at `rate_hz` on a named thread until shutdown, publishing each
/// successful sample on `sender`. A failed sample is skipped.
pub fn spawn_telemetry_loop<T, F>(
    name: &str,
    rate_hz: u32,
    shutdown: ShutdownSignal,
    sender: watch::Sender<Option<T>>,
    mut sample: F,
) -> std::io::Result<JoinHandle<()>>
where
    T: Send + Sync + 'static,
    F: FnMut() -> Result<T> + Send + 'static,
{
    let stream = name.to_string();
    thread::Builder::new().name(format!("telemetry-{}", name)).spawn(move || {
        debug!("{} telemetry loop started at {} Hz", stream, rate_hz);
        let mut rate = Rate::from_hz(rate_hz);
        while !shutdown.is_triggered() {
            match sample() {
                Ok(message) => {
                    sender.send_replace(Some(message));
                }
                Err(e) => trace!("{} sample skipped: {}", stream, e),
            }
            rate.sleep();
        }
        debug!("{} telemetry loop stopped", stream);
    })
}

/// Receiving ends of every telemetry stream.
pub struct TelemetryStreams {
    pub joint_state: watch::Receiver<Option<JointStateData>>,
    pub tcp_pose: watch::Receiver<Option<TcpPoseData>>,
    pub wrench: watch::Receiver<Option<WrenchData>>,
    pub executed: mpsc::UnboundedReceiver<TrajectoryExecutedData>,
}

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Forward telemetry to `publisher` until shutdown or until a stream closes.
pub async fn forward_telemetry(
    publisher: Arc<dyn TelemetryPublisher>,
    mut streams: TelemetryStreams,
    shutdown: ShutdownSignal,
) {
    info!("Telemetry forwarding started");
    let mut poll = tokio::time::interval(SHUTDOWN_POLL);
    loop {
        tokio::select! {
            changed = streams.joint_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = streams.joint_state.borrow_and_update().clone();
                if let Some(data) = latest {
                    if let Err(e) = publisher.publish_joint_state(&data).await {
                        warn!("Failed to publish joint state: {}", e);
                    }
                }
            }
            changed = streams.tcp_pose.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = streams.tcp_pose.borrow_and_update().clone();
                if let Some(data) = latest {
                    if let Err(e) = publisher.publish_tcp_pose(&data).await {
                        warn!("Failed to publish TCP pose: {}", e);
                    }
                }
            }
            changed = streams.wrench.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = streams.wrench.borrow_and_update().clone();
                if let Some(data) = latest {
                    if let Err(e) = publisher.publish_wrench(&data).await {
                        warn!("Failed to publish wrench: {}", e);
                    }
                }
            }
            executed = streams.executed.recv() => {
                match executed {
                    Some(data) => {
                        if let Err(e) = publisher.publish_trajectory_executed(&data).await {
                            warn!("Failed to publish trajectory executed: {}", e);
                        }
                    }
                    None => break,
                }
            }
            _ = poll.tick() => {
                if shutdown.is_triggered() {
                    break;
                }
            }
        }
    }
    info!("Telemetry forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDriver;

    #[derive(Default)]
    struct Recorder {
        joint_states: Mutex<Vec<JointStateData>>,
        executed: Mutex<Vec<TrajectoryExecutedData>>,
    }

    #[async_trait]
    impl TelemetryPublisher for Recorder {
        async fn publish_joint_state(&self, data: &JointStateData) -> anyhow::Result<()> {
            self.joint_states.lock().push(data.clone());
            Ok(())
        }

        async fn publish_tcp_pose(&self, _data: &TcpPoseData) -> anyhow::Result<()> {
            Ok(())
        }

        async fn publish_wrench(&self, _data: &WrenchData) -> anyhow::Result<()> {
            anyhow::bail!("wrench backend offline")
        }

        async fn publish_trajectory_executed(&self, data: &TrajectoryExecutedData) -> anyhow::Result<()> {
            self.executed.lock().push(data.clone());
            Ok(())
        }
    }

    #[test]
    fn loop_publishes_latest_sample_until_shutdown() {
        let driver = Arc::new(SimulatedDriver::new([0.5; 6]));
        let (tx, rx) = watch::channel(None);
        let shutdown = ShutdownSignal::new();
        let sampler = driver.clone();
        let handle = spawn_telemetry_loop("joint_state", 200, shutdown.clone(), tx, move || {
            sample_joint_state(sampler.as_ref())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.position, [0.5; 6]);

        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn loop_survives_failing_samples() {
        let driver = Arc::new(SimulatedDriver::new([0.0; 6]));
        driver.sever_connection();
        let (tx, rx) = watch::channel(None);
        let shutdown = ShutdownSignal::new();
        let sampler = driver.clone();
        let handle = spawn_telemetry_loop("wrench", 200, shutdown.clone(), tx, move || {
            sample_wrench(sampler.as_ref())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        assert!(rx.borrow().is_none());
        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn samples_convert_driver_readings() {
        let driver = SimulatedDriver::new([0.0; 6]);
        driver.set_wrench([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let wrench = sample_wrench(&driver).unwrap();
        assert_eq!(wrench.torque, [4.0, 5.0, 6.0]);
        let pose = sample_tcp_pose(&driver).unwrap();
        assert!(pose.pose.is_well_formed());
    }

    #[test]
    fn console_throttles_periodic_streams() {
        let console = ConsoleTelemetry::new(1);
        assert!(console.allow("joint_state"));
        assert!(!console.allow("joint_state"));
        assert!(console.allow("wrench"));
    }

    #[tokio::test]
    async fn forwarder_delivers_samples_and_notifications() {
        let (joint_tx, joint_state) = watch::channel(None);
        let (_pose_tx, tcp_pose) = watch::channel(None);
        let (wrench_tx, wrench) = watch::channel(None);
        let (executed_tx, executed) = mpsc::unbounded_channel();
        let streams = TelemetryStreams { joint_state, tcp_pose, wrench, executed };

        let recorder = Arc::new(Recorder::default());
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(forward_telemetry(recorder.clone(), streams, shutdown.clone()));

        joint_tx.send_replace(Some(JointStateData {
            timestamp: 1.0,
            position: [0.1; 6],
            velocity: [0.0; 6],
        }));
        wrench_tx.send_replace(Some(WrenchData::new(1.0, &[0.0; 6])));
        executed_tx
            .send(TrajectoryExecutedData { timestamp: 2.0, goal: "trajectory".to_string(), motions: 3 })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        task.await.unwrap();

        assert_eq!(recorder.joint_states.lock().len(), 1);
        assert_eq!(recorder.executed.lock()[0].motions, 3);
    }
}
