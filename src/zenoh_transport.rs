//! Zenoh transport
//!
//! Telemetry is published as JSON under `{prefix}/joint_states`,
//! `{prefix}/cartesian_pose`, `{prefix}/ft_sensor` and `{prefix}/trajectory_executed`.
//! Goals arrive on the three controller command topics, every other request goes
//! through the `{prefix}/service` queryable and gets a [`Response`] reply.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use zenoh::pubsub::Publisher;
use zenoh::query::Query;
use zenoh::Session;

use crate::interface::ControlInterface;
use crate::messages::{
    CartesianGoalMsg, JointGoalMsg, JointStateData, Request, Response, TcpPoseData, TrajectoryExecutedData,
    TrajectoryMsg, WrenchData,
};
use crate::signal::ShutdownSignal;
use crate::telemetry::TelemetryPublisher;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub const JOINT_STATES: &str = "joint_states";
pub const CARTESIAN_POSE: &str = "cartesian_pose";
pub const FT_SENSOR: &str = "ft_sensor";
pub const TRAJECTORY_EXECUTED: &str = "trajectory_executed";
pub const JOINT_GOAL_COMMAND: &str = "controllers/joint_space_controller/command";
pub const CARTESIAN_GOAL_COMMAND: &str = "controllers/cartesian_space_controller/command";
pub const TRAJECTORY_COMMAND: &str = "controllers/trajectory_controller/command";
pub const SERVICE: &str = "service";

pub fn topic(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

pub async fn open_session() -> Result<Arc<Session>> {
    let session = zenoh::open(zenoh::Config::default())
        .await
        .map_err(|e| anyhow!("Failed to open Zenoh session: {}", e))?;
    info!("Zenoh session opened");
    Ok(Arc::new(session))
}

/// Telemetry backend publishing each stream on its own key.
pub struct ZenohTelemetry {
    joint_states: Publisher<'static>,
    cartesian_pose: Publisher<'static>,
    ft_sensor: Publisher<'static>,
    trajectory_executed: Publisher<'static>,
    _session: Arc<Session>,
}

impl ZenohTelemetry {
    pub async fn new(session: Arc<Session>, prefix: &str) -> Result<Self> {
        let declare = |name: &str| {
            let key = topic(prefix, name);
            let session = session.clone();
            async move {
                let publisher = session
                    .declare_publisher(key.clone())
                    .await
                    .map_err(|e| anyhow!("Failed to create publisher {}: {}", key, e))?;
                debug!("  - publisher: {}", key);
                Ok::<_, anyhow::Error>(publisher)
            }
        };
        let publisher = Self {
            joint_states: declare(JOINT_STATES).await?,
            cartesian_pose: declare(CARTESIAN_POSE).await?,
            ft_sensor: declare(FT_SENSOR).await?,
            trajectory_executed: declare(TRAJECTORY_EXECUTED).await?,
            _session: session.clone(),
        };
        info!("Zenoh telemetry publishers created under '{}'", prefix);
        Ok(publisher)
    }

    async fn put<T: Serialize + Sync>(publisher: &Publisher<'static>, data: &T, what: &str) -> Result<()> {
        let payload = serde_json::to_vec(data).with_context(|| format!("Failed to serialize {}", what))?;
        publisher
            .put(payload)
            .await
            .map_err(|e| anyhow!("Failed to publish {}: {}", what, e))
    }
}

#[async_trait]
impl TelemetryPublisher for ZenohTelemetry {
    async fn publish_joint_state(&self, data: &JointStateData) -> Result<()> {
        Self::put(&self.joint_states, data, "joint state").await
    }

    async fn publish_tcp_pose(&self, data: &TcpPoseData) -> Result<()> {
        Self::put(&self.cartesian_pose, data, "cartesian pose").await
    }

    async fn publish_wrench(&self, data: &WrenchData) -> Result<()> {
        Self::put(&self.ft_sensor, data, "wrench").await
    }

    async fn publish_trajectory_executed(&self, data: &TrajectoryExecutedData) -> Result<()> {
        Self::put(&self.trajectory_executed, data, "trajectory executed").await
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes).context("Invalid UTF-8 in payload")?;
    serde_json::from_str(text).context("Failed to parse JSON payload")
}

async fn handle_command(interface: &ControlInterface, request: Result<Request>, topic: &str) {
    match request {
        Ok(request) => {
            let response = interface.handle(request).await;
            if !response.success {
                warn!("Command on {} rejected: {}", topic, response.message);
            }
        }
        Err(e) => error!("Invalid command on {}: {:#}", topic, e),
    }
}

async fn reply(query: &Query, response: Response) {
    let json = match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize service response: {}", e);
            return;
        }
    };
    if let Err(e) = query.reply(query.key_expr(), json).await {
        error!("Failed to send service reply: {}", e);
    } else {
        debug!("Sent {} reply: success={}", response.request, response.success);
    }
}

/// Serve command topics and the service queryable until shutdown.
pub async fn serve_commands(
    session: Arc<Session>,
    prefix: &str,
    interface: ControlInterface,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let joint_topic = topic(prefix, JOINT_GOAL_COMMAND);
    let cartesian_topic = topic(prefix, CARTESIAN_GOAL_COMMAND);
    let trajectory_topic = topic(prefix, TRAJECTORY_COMMAND);
    let service_key = topic(prefix, SERVICE);

    let joint_goals = session
        .declare_subscriber(joint_topic.clone())
        .await
        .map_err(|e| anyhow!("Failed to subscribe {}: {}", joint_topic, e))?;
    let cartesian_goals = session
        .declare_subscriber(cartesian_topic.clone())
        .await
        .map_err(|e| anyhow!("Failed to subscribe {}: {}", cartesian_topic, e))?;
    let trajectories = session
        .declare_subscriber(trajectory_topic.clone())
        .await
        .map_err(|e| anyhow!("Failed to subscribe {}: {}", trajectory_topic, e))?;
    let service = session
        .declare_queryable(service_key.clone())
        .await
        .map_err(|e| anyhow!("Failed to declare queryable {}: {}", service_key, e))?;
    info!("Zenoh command topics and service '{}' ready", service_key);

    let mut poll = tokio::time::interval(SHUTDOWN_POLL);
    loop {
        tokio::select! {
            sample = joint_goals.recv_async() => {
                let Ok(sample) = sample else { break };
                let request = decode::<JointGoalMsg>(&sample.payload().to_bytes()).map(Request::JointGoal);
                handle_command(&interface, request, &joint_topic).await;
            }
            sample = cartesian_goals.recv_async() => {
                let Ok(sample) = sample else { break };
                let request = decode::<CartesianGoalMsg>(&sample.payload().to_bytes()).map(Request::CartesianGoal);
                handle_command(&interface, request, &cartesian_topic).await;
            }
            sample = trajectories.recv_async() => {
                let Ok(sample) = sample else { break };
                let request = decode::<TrajectoryMsg>(&sample.payload().to_bytes()).map(Request::Trajectory);
                handle_command(&interface, request, &trajectory_topic).await;
            }
            query = service.recv_async() => {
                let Ok(query) = query else { break };
                let response = match query.payload() {
                    Some(payload) => match decode::<Request>(&payload.to_bytes()) {
                        Ok(request) => interface.handle(request).await,
                        Err(e) => Response::failed("invalid", format!("Invalid request: {:#}", e)),
                    },
                    None => Response::failed("invalid", "Service request needs a JSON payload"),
                };
                reply(&query, response).await;
            }
            _ = poll.tick() => {
                if shutdown.is_triggered() {
                    break;
                }
            }
        }
    }
    info!("Zenoh command handling stopped");
    Ok(())
}
