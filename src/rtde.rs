//! Pure Rust implementation of the RTDE (Real-Time Data Exchange) protocol
//! Follows Universal Robots' published RTDE protocol description
//!
//! [`RtdeClient`] performs the handshake and decodes data packages;
//! [`RtdeReceiver`] keeps the latest [`RtdeState`] on a background thread.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::types::{JointVector, JointVelocity, Wrench};
use crate::{MotionError, Result};

/// Output frequency requested from the controller (e-Series maximum).
pub const RTDE_FREQUENCY: f64 = 500.0;

/// Samples older than this are reported as a lost connection.
const STALE_AFTER: Duration = Duration::from_millis(500);

/// Variables subscribed by [`RtdeReceiver`].
pub const STATE_RECIPE: [&str; 8] = [
    "timestamp",
    "actual_q",
    "actual_qd",
    "actual_TCP_pose",
    "actual_TCP_force",
    "robot_mode",
    "safety_mode",
    "safety_status_bits",
];

/// RTDE message types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtdeMessage {
    RequestProtocolVersion = 86,
    TextMessage = 77,
    DataPackage = 85,
    ControlPackageSetupOutputs = 79,
    ControlPackageSetupInputs = 78,
    ControlPackageStart = 83,
    ControlPackagePause = 80,
}

impl RtdeMessage {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            86 => Some(RtdeMessage::RequestProtocolVersion),
            77 => Some(RtdeMessage::TextMessage),
            85 => Some(RtdeMessage::DataPackage),
            79 => Some(RtdeMessage::ControlPackageSetupOutputs),
            78 => Some(RtdeMessage::ControlPackageSetupInputs),
            83 => Some(RtdeMessage::ControlPackageStart),
            80 => Some(RtdeMessage::ControlPackagePause),
            _ => None,
        }
    }
}

/// Frame a message: big-endian u16 size (header included), type byte, payload.
pub fn encode_message(msg_type: RtdeMessage, payload: &[u8]) -> Vec<u8> {
    let size = (payload.len() + 3) as u16;
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.extend_from_slice(&size.to_be_bytes());
    frame.push(msg_type as u8);
    frame.extend_from_slice(payload);
    frame
}

fn protocol_error(message: impl Into<String>) -> MotionError {
    MotionError::Driver(format!("RTDE: {}", message.into()))
}

/// One decoded sample of the state recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct RtdeState {
    pub timestamp: f64,
    pub actual_q: JointVector,
    pub actual_qd: JointVelocity,
    pub actual_tcp_pose: [f64; 6],
    pub actual_tcp_force: Wrench,
    pub robot_mode: i32,
    /// Raw controller value, 1-based (1 = NORMAL).
    pub safety_mode: i32,
    pub safety_status_bits: u32,
}

impl RtdeState {
    pub fn from_package(data: &HashMap<String, Vec<f64>>) -> Result<Self> {
        let vector = |name: &str| -> Result<[f64; 6]> {
            let values = data
                .get(name)
                .ok_or_else(|| protocol_error(format!("missing {}", name)))?;
            values
                .as_slice()
                .try_into()
                .map_err(|_| protocol_error(format!("{} has {} values", name, values.len())))
        };
        let scalar = |name: &str| -> Result<f64> {
            data.get(name)
                .and_then(|values| values.first())
                .copied()
                .ok_or_else(|| protocol_error(format!("missing {}", name)))
        };
        Ok(Self {
            timestamp: scalar("timestamp")?,
            actual_q: vector("actual_q")?,
            actual_qd: vector("actual_qd")?,
            actual_tcp_pose: vector("actual_TCP_pose")?,
            actual_tcp_force: vector("actual_TCP_force")?,
            robot_mode: scalar("robot_mode")? as i32,
            safety_mode: scalar("safety_mode")? as i32,
            safety_status_bits: scalar("safety_status_bits")? as u32,
        })
    }
}

/// RTDE client for communicating with Universal Robots
pub struct RtdeClient {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    protocol_version: Option<u16>,
    variables: Vec<String>,
    variable_types: Vec<String>,
}

impl RtdeClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: None,
            protocol_version: None,
            variables: Vec::new(),
            variable_types: Vec::new(),
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect((&self.host[..], self.port))
            .map_err(|e| protocol_error(format!("failed to connect to {}:{}: {}", self.host, self.port, e)))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Handle for unblocking a reader on another thread.
    pub fn try_clone_stream(&self) -> Result<TcpStream> {
        let stream = self.stream.as_ref().ok_or_else(|| protocol_error("not connected"))?;
        Ok(stream.try_clone()?)
    }

    fn send_message(&mut self, msg_type: RtdeMessage, payload: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| protocol_error("not connected"))?;
        stream
            .write_all(&encode_message(msg_type, payload))
            .map_err(|e| protocol_error(format!("failed to send {:?}: {}", msg_type, e)))
    }

    fn receive_message(&mut self) -> Result<(RtdeMessage, Vec<u8>)> {
        let stream = self.stream.as_mut().ok_or_else(|| protocol_error("not connected"))?;

        let mut header = [0u8; 3];
        stream
            .read_exact(&mut header)
            .map_err(|e| protocol_error(format!("failed to read header: {}", e)))?;

        let size = u16::from_be_bytes([header[0], header[1]]) as usize;
        if size < 3 {
            return Err(protocol_error(format!("invalid frame size {}", size)));
        }
        let mut payload = vec![0u8; size - 3];
        stream
            .read_exact(&mut payload)
            .map_err(|e| protocol_error(format!("failed to read payload: {}", e)))?;

        let msg_type = RtdeMessage::from_code(header[2])
            .ok_or_else(|| protocol_error(format!("unknown message type {}", header[2])))?;
        Ok((msg_type, payload))
    }

    /// Receive the next message that is not a controller text message.
    fn receive_reply(&mut self) -> Result<(RtdeMessage, Vec<u8>)> {
        loop {
            let (msg_type, payload) = self.receive_message()?;
            if msg_type == RtdeMessage::TextMessage {
                warn!("RTDE controller message: {}", String::from_utf8_lossy(&payload));
                continue;
            }
            return Ok((msg_type, payload));
        }
    }

    pub fn negotiate_protocol_version(&mut self, requested_version: u16) -> Result<()> {
        self.send_message(RtdeMessage::RequestProtocolVersion, &requested_version.to_be_bytes())?;
        let (msg_type, payload) = self.receive_reply()?;
        if msg_type == RtdeMessage::RequestProtocolVersion && payload.first() == Some(&1) {
            self.protocol_version = Some(requested_version);
            return Ok(());
        }
        Err(protocol_error(format!("protocol version {} refused", requested_version)))
    }

    /// Configure which variables the controller streams, at `frequency` Hz.
    pub fn setup_output_recipe(&mut self, variables: &[&str], frequency: f64) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&frequency.to_be_bytes());
        payload.extend_from_slice(variables.join(",").as_bytes());
        self.send_message(RtdeMessage::ControlPackageSetupOutputs, &payload)?;

        let (msg_type, reply) = self.receive_reply()?;
        if msg_type != RtdeMessage::ControlPackageSetupOutputs || reply.is_empty() {
            return Err(protocol_error("output recipe setup failed"));
        }
        let types: Vec<String> = String::from_utf8_lossy(&reply[1..])
            .split(',')
            .map(|s| s.to_string())
            .collect();
        if let Some(position) = types.iter().position(|t| t == "NOT_FOUND") {
            return Err(protocol_error(format!("controller does not know variable '{}'", variables[position])));
        }
        self.variables = variables.iter().map(|v| v.to_string()).collect();
        self.variable_types = types;
        debug!("RTDE recipe {:?} -> {:?}", self.variables, self.variable_types);
        Ok(())
    }

    pub fn start_data_synchronization(&mut self) -> Result<()> {
        self.send_message(RtdeMessage::ControlPackageStart, &[])?;
        let (msg_type, payload) = self.receive_reply()?;
        if msg_type == RtdeMessage::ControlPackageStart && payload.first() == Some(&1) {
            return Ok(());
        }
        Err(protocol_error("failed to start data synchronization"))
    }

    /// Read and decode the next data package.
    pub fn read_data_package(&mut self) -> Result<HashMap<String, Vec<f64>>> {
        let (msg_type, payload) = self.receive_reply()?;
        if msg_type != RtdeMessage::DataPackage {
            return Err(protocol_error(format!("expected data package, got {:?}", msg_type)));
        }
        if payload.is_empty() {
            return Err(protocol_error("empty data package"));
        }
        parse_data_package(&self.variables, &self.variable_types, &payload[1..])
    }

    pub fn protocol_version(&self) -> Option<u16> {
        self.protocol_version
    }
}

fn read_f64(data: &[u8], offset: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    f64::from_be_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

/// Decode package fields in recipe order. Integers are widened to `f64`.
pub fn parse_data_package(
    variables: &[String],
    variable_types: &[String],
    data: &[u8],
) -> Result<HashMap<String, Vec<f64>>> {
    let mut result = HashMap::new();
    let mut offset = 0;

    for (i, var_type) in variable_types.iter().enumerate() {
        let name = variables
            .get(i)
            .ok_or_else(|| protocol_error("variable name missing"))?;
        let width = match var_type.as_str() {
            "VECTOR6D" => 48,
            "DOUBLE" => 8,
            "INT32" | "UINT32" => 4,
            other => return Err(protocol_error(format!("unsupported variable type {}", other))),
        };
        if offset + width > data.len() {
            return Err(protocol_error(format!("insufficient data for {} ({})", name, var_type)));
        }
        let values = match var_type.as_str() {
            "VECTOR6D" => (0..6).map(|j| read_f64(data, offset + j * 8)).collect(),
            "DOUBLE" => vec![read_f64(data, offset)],
            "INT32" => vec![read_u32(data, offset) as i32 as f64],
            _ => vec![read_u32(data, offset) as f64],
        };
        result.insert(name.clone(), values);
        offset += width;
    }

    Ok(result)
}

struct Sample {
    state: RtdeState,
    received: Instant,
}

/// Background RTDE reader holding the newest robot state.
pub struct RtdeReceiver {
    latest: Arc<ArcSwapOption<Sample>>,
    connected: Arc<AtomicBool>,
    stream: TcpStream,
    handle: Option<JoinHandle<()>>,
}

impl RtdeReceiver {
    /// Connect, subscribe to [`STATE_RECIPE`] and start the reader thread.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let mut client = RtdeClient::new(host, port);
        client.connect()?;
        client.negotiate_protocol_version(2)?;
        client.setup_output_recipe(&STATE_RECIPE, RTDE_FREQUENCY)?;
        client.start_data_synchronization()?;
        info!("RTDE streaming from {}:{} at {} Hz", host, port, RTDE_FREQUENCY);

        let stream = client.try_clone_stream()?;
        let latest: Arc<ArcSwapOption<Sample>> = Arc::new(ArcSwapOption::empty());
        let connected = Arc::new(AtomicBool::new(true));

        let handle = {
            let latest = latest.clone();
            let connected = connected.clone();
            thread::Builder::new().name("rtde-receive".to_string()).spawn(move || {
                loop {
                    let sample = client
                        .read_data_package()
                        .and_then(|package| RtdeState::from_package(&package));
                    match sample {
                        Ok(state) => latest.store(Some(Arc::new(Sample { state, received: Instant::now() }))),
                        Err(e) => {
                            if connected.swap(false, Ordering::AcqRel) {
                                error!("RTDE connection lost: {}", e);
                            }
                            break;
                        }
                    }
                }
            })?
        };

        Ok(Self {
            latest,
            connected,
            stream,
            handle: Some(handle),
        })
    }

    /// Newest state, or a driver error when the stream is down or stale.
    pub fn latest(&self) -> Result<RtdeState> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(protocol_error("connection lost"));
        }
        let guard = self.latest.load();
        let sample = (*guard).as_ref().ok_or_else(|| protocol_error("no data received yet"))?;
        if sample.received.elapsed() > STALE_AFTER {
            return Err(protocol_error(format!(
                "no data for {} ms",
                sample.received.elapsed().as_millis()
            )));
        }
        Ok(sample.state.clone())
    }

    /// Stop streaming. Later reads fail with a driver error.
    pub fn shutdown(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("RTDE stream closed");
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Stop streaming and join the reader thread.
    pub fn close(&mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("RTDE reader thread panicked");
            }
        }
    }
}

impl Drop for RtdeReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-process RTDE controller stand-in for tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::net::TcpListener;

    pub fn state_package(q: JointVector, qd: JointVelocity, safety_mode: i32) -> Vec<u8> {
        let mut payload = vec![1u8];
        payload.extend_from_slice(&12.5f64.to_be_bytes());
        for vector in [q, qd, [0.4, -0.2, 0.6, 0.0, 3.1, 0.0], [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]] {
            for value in vector {
                payload.extend_from_slice(&value.to_be_bytes());
            }
        }
        payload.extend_from_slice(&7i32.to_be_bytes());
        payload.extend_from_slice(&safety_mode.to_be_bytes());
        payload.extend_from_slice(&1u32.to_be_bytes());
        encode_message(RtdeMessage::DataPackage, &payload)
    }

    fn read_frame(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let mut header = [0u8; 3];
        stream.read_exact(&mut header).ok()?;
        let size = u16::from_be_bytes([header[0], header[1]]) as usize;
        let mut payload = vec![0u8; size - 3];
        stream.read_exact(&mut payload).ok()?;
        Some((header[2], payload))
    }

    /// Answer the handshake, then stream `q` at rest every 2 ms until `packages` are sent.
    pub fn serve(listener: TcpListener, q: JointVector, packages: usize) -> JoinHandle<()> {
        serve_with(listener, packages, move || (q, [0.0; 6]))
    }

    /// Like [`serve`], asking `sample` for the joint positions and velocities of each package.
    pub fn serve_with<F>(listener: TcpListener, packages: usize, mut sample: F) -> JoinHandle<()>
    where
        F: FnMut() -> (JointVector, JointVelocity) + Send + 'static,
    {
        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else { return };
            let types = "DOUBLE,VECTOR6D,VECTOR6D,VECTOR6D,VECTOR6D,INT32,INT32,UINT32";
            while let Some((code, _)) = read_frame(&mut stream) {
                let reply = match code {
                    86 => encode_message(RtdeMessage::RequestProtocolVersion, &[1]),
                    79 => {
                        let mut payload = vec![1u8];
                        payload.extend_from_slice(types.as_bytes());
                        encode_message(RtdeMessage::ControlPackageSetupOutputs, &payload)
                    }
                    83 => {
                        let _ = stream.write_all(&encode_message(RtdeMessage::ControlPackageStart, &[1]));
                        break;
                    }
                    _ => return,
                };
                if stream.write_all(&reply).is_err() {
                    return;
                }
            }
            let _ = stream.write_all(&encode_message(RtdeMessage::TextMessage, b"hello"));
            for _ in 0..packages {
                let (q, qd) = sample();
                if stream.write_all(&state_package(q, qd, 1)).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(2));
            }
        })
    }
}
