//! Robotiq gripper control
//!
//! The gripper URCap exposes an ASCII socket on the controller (port 63352 by
//! default). Commands are `SET <VAR> <value>` answered with `ack`, queries are
//! `GET <VAR>` answered with `<VAR> <value>`.

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::messages::GripperCommandMsg;
use crate::{MotionError, Result};

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);
const MOVE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Object detection result reported when a gripper move ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    /// Fingers still opening or closing.
    Moving = 0,
    /// Stopped on an object while opening.
    StoppedOuterObject = 1,
    /// Stopped on an object while closing.
    StoppedInnerObject = 2,
    /// Requested position reached, no object detected.
    AtDestination = 3,
}

impl ObjectStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ObjectStatus::Moving),
            1 => Some(ObjectStatus::StoppedOuterObject),
            2 => Some(ObjectStatus::StoppedInnerObject),
            3 => Some(ObjectStatus::AtDestination),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Gripper move with every value normalised to `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperCommand {
    /// 0 fully open, 1 fully closed.
    pub position: f64,
    pub speed: f64,
    pub force: f64,
}

impl GripperCommand {
    /// Build from percentages, clamping each into range.
    pub fn from_percent(position: f64, speed: f64, force: f64) -> Result<Self> {
        let normalise = |name: &str, value: f64| {
            if value.is_finite() {
                Ok((value / 100.0).clamp(0.0, 1.0))
            } else {
                Err(MotionError::Validation(format!("gripper {} must be finite, got {}", name, value)))
            }
        };
        Ok(Self {
            position: normalise("position", position)?,
            speed: normalise("speed", speed)?,
            force: normalise("force", force)?,
        })
    }
}

impl TryFrom<&GripperCommandMsg> for GripperCommand {
    type Error = MotionError;

    fn try_from(msg: &GripperCommandMsg) -> Result<Self> {
        Self::from_percent(msg.position, msg.speed, msg.force)
    }
}

fn to_register(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Anything that can run a blocking gripper move.
pub trait GripperDriver: Send + Sync {
    /// Move and wait for the fingers to stop.
    fn move_and_wait(&self, command: &GripperCommand) -> Result<ObjectStatus>;

    fn disconnect(&self) -> Result<()>;
}

struct GripperConnection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

pub struct RobotiqGripper {
    connection: Mutex<Option<GripperConnection>>,
    reply_pattern: Regex,
    address: String,
}

impl RobotiqGripper {
    /// Connect and activate the gripper.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        let socket_addr = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MotionError::Config(format!("cannot resolve gripper address {}", address)))?;
        let writer = TcpStream::connect_timeout(&socket_addr, SOCKET_TIMEOUT)
            .map_err(|e| MotionError::Driver(format!("failed to connect to gripper at {}: {}", address, e)))?;
        writer.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        writer.set_nodelay(true)?;
        let reader = BufReader::new(writer.try_clone()?);

        let gripper = Self {
            connection: Mutex::new(Some(GripperConnection { writer, reader })),
            reply_pattern: Regex::new(r"^([A-Z]{3})\s+(\d+)$")
                .map_err(|e| MotionError::Config(format!("invalid gripper reply pattern: {}", e)))?,
            address,
        };
        gripper.activate()?;
        info!("Robotiq gripper connected at {}", gripper.address);
        Ok(gripper)
    }

    fn activate(&self) -> Result<()> {
        if self.get("ACT")? == 1 && self.get("STA")? == 3 {
            debug!("Gripper already active");
            return Ok(());
        }
        self.set(&[("ACT", 1)])?;
        let deadline = Instant::now() + MOVE_TIMEOUT;
        while self.get("STA")? != 3 {
            if Instant::now() > deadline {
                return Err(MotionError::Driver("gripper activation timed out".to_string()));
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    fn exchange(&self, line: &str) -> Result<String> {
        let mut guard = self.connection.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| MotionError::Driver(format!("gripper at {} is disconnected", self.address)))?;
        connection
            .writer
            .write_all(format!("{}\n", line).as_bytes())
            .map_err(|e| MotionError::Driver(format!("gripper write failed: {}", e)))?;
        let mut reply = String::new();
        let read = connection
            .reader
            .read_line(&mut reply)
            .map_err(|e| MotionError::Driver(format!("gripper read failed: {}", e)))?;
        if read == 0 {
            return Err(MotionError::Driver("gripper closed the connection".to_string()));
        }
        Ok(reply.trim().to_string())
    }

    fn set(&self, values: &[(&str, u8)]) -> Result<()> {
        let assignments: Vec<String> = values.iter().map(|(var, value)| format!("{} {}", var, value)).collect();
        let reply = self.exchange(&format!("SET {}", assignments.join(" ")))?;
        if reply == "ack" {
            Ok(())
        } else {
            Err(MotionError::CommandRejected(format!("gripper refused SET: {}", reply)))
        }
    }

    fn get(&self, variable: &str) -> Result<u8> {
        let reply = self.exchange(&format!("GET {}", variable))?;
        parse_reply(&self.reply_pattern, variable, &reply)
    }
}

fn parse_reply(pattern: &Regex, variable: &str, reply: &str) -> Result<u8> {
    let captures = pattern
        .captures(reply)
        .ok_or_else(|| MotionError::Driver(format!("unexpected gripper reply '{}'", reply)))?;
    if &captures[1] != variable {
        return Err(MotionError::Driver(format!(
            "gripper answered {} when asked for {}",
            &captures[1], variable
        )));
    }
    captures[2]
        .parse()
        .map_err(|_| MotionError::Driver(format!("gripper value out of range in '{}'", reply)))
}

impl GripperDriver for RobotiqGripper {
    fn move_and_wait(&self, command: &GripperCommand) -> Result<ObjectStatus> {
        self.set(&[
            ("POS", to_register(command.position)),
            ("SPE", to_register(command.speed)),
            ("FOR", to_register(command.force)),
            ("GTO", 1),
        ])?;

        let deadline = Instant::now() + MOVE_TIMEOUT;
        loop {
            let code = self.get("OBJ")?;
            let status = ObjectStatus::from_code(code)
                .ok_or_else(|| MotionError::Driver(format!("unknown gripper object status {}", code)))?;
            if status != ObjectStatus::Moving {
                debug!("Gripper stopped with {:?}", status);
                return Ok(status);
            }
            if Instant::now() > deadline {
                return Err(MotionError::Driver("gripper move timed out".to_string()));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn disconnect(&self) -> Result<()> {
        if let Some(connection) = self.connection.lock().take() {
            let _ = connection.writer.shutdown(std::net::Shutdown::Both);
            info!("Robotiq gripper disconnected");
        }
        Ok(())
    }
}

/// Gripper stand-in that reports every move as reaching its destination.
#[derive(Default)]
pub struct SimulatedGripper {
    moves: Mutex<Vec<GripperCommand>>,
}

impl SimulatedGripper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn moves(&self) -> Vec<GripperCommand> {
        self.moves.lock().clone()
    }
}

impl GripperDriver for SimulatedGripper {
    fn move_and_wait(&self, command: &GripperCommand) -> Result<ObjectStatus> {
        self.moves.lock().push(*command);
        Ok(ObjectStatus::AtDestination)
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn percentages_are_normalised_and_clamped() {
        let command = GripperCommand::from_percent(50.0, 120.0, -5.0).unwrap();
        assert_eq!(command.position, 0.5);
        assert_eq!(command.speed, 1.0);
        assert_eq!(command.force, 0.0);
        assert!(GripperCommand::from_percent(f64::NAN, 0.0, 0.0).is_err());
    }

    #[test]
    fn register_scaling() {
        assert_eq!(to_register(0.0), 0);
        assert_eq!(to_register(0.5), 128);
        assert_eq!(to_register(1.0), 255);
    }

    #[test]
    fn object_status_codes() {
        assert_eq!(ObjectStatus::from_code(2), Some(ObjectStatus::StoppedInnerObject));
        assert_eq!(ObjectStatus::AtDestination.code(), 3);
        assert_eq!(ObjectStatus::from_code(4), None);
    }

    #[test]
    fn replies_are_checked_against_the_query() {
        let pattern = Regex::new(r"^([A-Z]{3})\s+(\d+)$").unwrap();
        assert_eq!(parse_reply(&pattern, "OBJ", "OBJ 3").unwrap(), 3);
        assert!(parse_reply(&pattern, "OBJ", "POS 3").is_err());
        assert!(parse_reply(&pattern, "OBJ", "?").is_err());
    }

    /// Minimal URCap socket: already active, reports one moving poll then object detection.
    fn fake_urcap(listener: TcpListener) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = BufReader::new(stream);
            let mut received = Vec::new();
            let mut obj_polls = 0;
            for line in reader.lines() {
                let line = line.unwrap();
                let reply = match line.as_str() {
                    "GET ACT" => "ACT 1".to_string(),
                    "GET STA" => "STA 3".to_string(),
                    "GET OBJ" => {
                        obj_polls += 1;
                        if obj_polls == 1 { "OBJ 0".to_string() } else { "OBJ 2".to_string() }
                    }
                    _ => "ack".to_string(),
                };
                received.push(line);
                writer.write_all(format!("{}\n", reply).as_bytes()).unwrap();
            }
            received
        })
    }

    #[test]
    fn move_waits_for_object_detection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = fake_urcap(listener);

        let gripper = RobotiqGripper::connect("127.0.0.1", port).unwrap();
        let command = GripperCommand::from_percent(100.0, 50.0, 20.0).unwrap();
        assert_eq!(gripper.move_and_wait(&command).unwrap(), ObjectStatus::StoppedInnerObject);
        gripper.disconnect().unwrap();
        assert!(gripper.move_and_wait(&command).unwrap_err().is_fatal());

        let received = server.join().unwrap();
        assert!(received.contains(&"SET POS 255 SPE 128 FOR 51 GTO 1".to_string()));
    }
}
