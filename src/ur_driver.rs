//! Driver for a real UR controller
//!
//! State comes from the RTDE stream; commands are URScript programs written to the
//! secondary client interface. Each program sets the configured TCP first, so tool
//! poses sent and read back always refer to the same point. Kinematic queries use
//! the analytic UR10e model composed with that TCP offset.
//!
//! Moves and stops block until the RTDE stream shows the arm at rest, the same
//! contract the controller's own blocking `movej`/`stopj` calls give. A program sent
//! while another is running replaces it, so returning early would cut motions short.

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::config::{ControllerConfig, RobotConfig};
use crate::driver::RobotDriver;
use crate::kinematics;
use crate::pose::NativePose;
use crate::rtde::{RtdeReceiver, RtdeState};
use crate::safety::safety_mode_label;
use crate::types::{FreeAxes, JointVector, JointVelocity, Wrench};
use crate::{MotionError, Result};

/// Tool acceleration for linear moves, m/s².
const LINEAR_ACCELERATION: f64 = 1.2;

/// Joints closer than this to the target have arrived, rad.
const JOINT_TOLERANCE: f64 = 2e-3;
/// Tool closer than this to the target has arrived, m.
const TOOL_TOLERANCE: f64 = 1e-3;
const TOOL_ANGLE_TOLERANCE: f64 = 2e-3;
/// Joint speeds below this count as standing still, rad/s.
const REST_SPEED: f64 = 5e-3;
/// Resting away from the target this long means the move was refused or cancelled.
const IDLE_GRACE: Duration = Duration::from_secs(1);
const MOTION_TIMEOUT: Duration = Duration::from_secs(120);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// One RTDE period.
const POLL_PERIOD: Duration = Duration::from_millis(2);

fn at_rest(state: &RtdeState) -> bool {
    state.actual_qd.iter().all(|v| v.abs() < REST_SPEED)
}

fn joints_reached(state: &RtdeState, target: &JointVector) -> bool {
    state
        .actual_q
        .iter()
        .zip(target.iter())
        .all(|(actual, target)| (actual - target).abs() < JOINT_TOLERANCE)
}

fn pose_reached(state: &RtdeState, target: &NativePose) -> bool {
    let delta = NativePose(state.actual_tcp_pose).to_isometry().inverse() * target.to_isometry();
    delta.translation.vector.norm() < TOOL_TOLERANCE && delta.rotation.angle() < TOOL_ANGLE_TOLERANCE
}

fn format_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{:.6}", v)).collect();
    items.join(",")
}

fn format_pose(pose: &[f64; 6]) -> String {
    format!("p[{}]", format_list(pose))
}

/// Wrap `body` lines into a named URScript program that selects `tcp` first.
pub fn script_program(name: &str, tcp: &[f64; 6], body: &[String]) -> String {
    let mut program = format!("def {}():\n  set_tcp({})\n", name, format_pose(tcp));
    for line in body {
        let _ = writeln!(program, "  {}", line);
    }
    program.push_str("end\n");
    program
}

pub fn move_j_script(positions: &JointVector, velocity: f64, acceleration: f64) -> String {
    format!("movej([{}], a={:.6}, v={:.6})", format_list(positions), acceleration, velocity)
}

pub fn move_l_script(pose: &NativePose, velocity: f64) -> String {
    format!("movel({}, a={:.6}, v={:.6})", format_pose(&pose.0), LINEAR_ACCELERATION, velocity)
}

pub fn freedrive_script(free_axes: &FreeAxes) -> Vec<String> {
    let axes: Vec<&str> = free_axes.iter().map(|free| if *free { "1" } else { "0" }).collect();
    vec![
        format!("freedrive_mode(freeAxes=[{}], feature=p[0,0,0,0,0,0])", axes.join(",")),
        "while (True):".to_string(),
        "  sync()".to_string(),
        "end".to_string(),
    ]
}

pub struct UrDriver {
    rtde: RtdeReceiver,
    script: Mutex<Option<TcpStream>>,
    tcp_offset: [f64; 6],
    joint_limits: JointVector,
    address: String,
}

impl UrDriver {
    pub fn connect(config: &ControllerConfig) -> Result<Self> {
        let robot: &RobotConfig = &config.robot;
        let rtde = RtdeReceiver::connect(&robot.host, robot.rtde_port)?;

        let address = format!("{}:{}", robot.host, robot.script_port);
        let script = TcpStream::connect(&address)
            .map_err(|e| MotionError::Driver(format!("failed to connect script interface {}: {}", address, e)))?;
        script.set_nodelay(true)?;

        // The secondary interface streams robot state we do not use; drain it so the
        // controller never blocks on a full socket.
        let mut drain = script.try_clone()?;
        thread::Builder::new().name("script-drain".to_string()).spawn(move || {
            let mut buffer = [0u8; 4096];
            while let Ok(read) = drain.read(&mut buffer) {
                if read == 0 {
                    break;
                }
                trace!("discarded {} bytes from script interface", read);
            }
        })?;

        info!("Connected to UR controller at {}", robot.host);
        Ok(Self {
            rtde,
            script: Mutex::new(Some(script)),
            tcp_offset: robot.tcp_offset,
            joint_limits: config.control.joint_limits,
            address,
        })
    }

    fn send_program(&self, name: &str, body: &[String]) -> Result<()> {
        let program = script_program(name, &self.tcp_offset, body);
        debug!("URScript {}", name);
        let mut guard = self.script.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| MotionError::Driver(format!("script interface {} is closed", self.address)))?;
        stream
            .write_all(program.as_bytes())
            .map_err(|e| MotionError::Driver(format!("failed to send URScript: {}", e)))
    }

    /// Block until the arm rests where `reached` says it should.
    fn wait_for_motion(&self, what: &str, reached: impl Fn(&RtdeState) -> bool) -> Result<()> {
        let started = Instant::now();
        let mut resting_since: Option<Instant> = None;
        loop {
            let state = self.rtde.latest()?;
            let resting = at_rest(&state);
            if resting && reached(&state) {
                debug!("{} finished after {} ms", what, started.elapsed().as_millis());
                return Ok(());
            }
            // Driver codes are 0-based; anything past REDUCED halts motion.
            let safety_mode = state.safety_mode - 1;
            if safety_mode > 1 {
                return Err(MotionError::CommandRejected(format!(
                    "{} interrupted by {}",
                    what,
                    safety_mode_label(safety_mode)
                )));
            }
            if resting {
                let since = *resting_since.get_or_insert_with(Instant::now);
                if since.elapsed() > IDLE_GRACE {
                    return Err(MotionError::CommandRejected(format!("{} stopped short of its target", what)));
                }
            } else {
                resting_since = None;
            }
            if started.elapsed() > MOTION_TIMEOUT {
                return Err(MotionError::CommandRejected(format!(
                    "{} still running after {} s",
                    what,
                    MOTION_TIMEOUT.as_secs()
                )));
            }
            thread::sleep(POLL_PERIOD);
        }
    }

    fn wait_for_rest(&self, what: &str) -> Result<()> {
        let started = Instant::now();
        while !at_rest(&self.rtde.latest()?) {
            if started.elapsed() > STOP_TIMEOUT {
                return Err(MotionError::CommandRejected(format!(
                    "{} did not bring the arm to rest within {} s",
                    what,
                    STOP_TIMEOUT.as_secs()
                )));
            }
            thread::sleep(POLL_PERIOD);
        }
        Ok(())
    }

    fn tcp_isometry(&self) -> nalgebra::Isometry3<f64> {
        NativePose(self.tcp_offset).to_isometry()
    }
}

impl RobotDriver for UrDriver {
    fn move_j(&self, positions: &JointVector, velocity: f64, acceleration: f64) -> Result<()> {
        self.send_program("urmc_movej", &[move_j_script(positions, velocity, acceleration)])?;
        self.wait_for_motion("movej", |state| joints_reached(state, positions))
    }

    fn move_l(&self, pose: &NativePose, velocity: f64) -> Result<()> {
        self.send_program("urmc_movel", &[move_l_script(pose, velocity)])?;
        self.wait_for_motion("movel", |state| pose_reached(state, pose))
    }

    fn speed_stop(&self, deceleration: f64) -> Result<()> {
        self.send_program("urmc_stopl", &[format!("stopl({:.6})", deceleration)])?;
        self.wait_for_rest("stopl")
    }

    fn stop_j(&self, deceleration: f64) -> Result<()> {
        self.send_program("urmc_stopj", &[format!("stopj({:.6})", deceleration)])?;
        self.wait_for_rest("stopj")
    }

    fn freedrive_mode(&self, free_axes: &FreeAxes) -> Result<()> {
        self.send_program("urmc_freedrive", &freedrive_script(free_axes))
    }

    fn end_freedrive_mode(&self) -> Result<()> {
        self.send_program("urmc_end_freedrive", &["end_freedrive_mode()".to_string()])
    }

    fn zero_ft_sensor(&self) -> Result<()> {
        self.send_program("urmc_zero_ft", &["zero_ftsensor()".to_string()])
    }

    fn get_forward_kinematics(&self, q: &JointVector) -> Result<NativePose> {
        Ok(NativePose::from_isometry(&(kinematics::forward_kinematics(q) * self.tcp_isometry())))
    }

    fn get_inverse_kinematics(&self, pose: &NativePose) -> Result<JointVector> {
        let flange = pose.to_isometry() * self.tcp_isometry().inverse();
        let seed = self.rtde.latest()?.actual_q;
        kinematics::inverse_kinematics(&flange, &seed, &self.joint_limits)
    }

    fn get_actual_q(&self) -> Result<JointVector> {
        Ok(self.rtde.latest()?.actual_q)
    }

    fn get_actual_qd(&self) -> Result<JointVelocity> {
        Ok(self.rtde.latest()?.actual_qd)
    }

    fn get_actual_tcp_pose(&self) -> Result<NativePose> {
        Ok(NativePose(self.rtde.latest()?.actual_tcp_pose))
    }

    fn get_actual_tcp_force(&self) -> Result<Wrench> {
        Ok(self.rtde.latest()?.actual_tcp_force)
    }

    fn get_robot_mode(&self) -> Result<i32> {
        Ok(self.rtde.latest()?.robot_mode)
    }

    fn get_safety_mode(&self) -> Result<i32> {
        // RTDE numbers safety modes from 1.
        Ok(self.rtde.latest()?.safety_mode - 1)
    }

    fn get_safety_status_bits(&self) -> Result<u32> {
        Ok(self.rtde.latest()?.safety_status_bits)
    }

    fn disconnect(&self) -> Result<()> {
        if let Some(stream) = self.script.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.rtde.shutdown();
        info!("Disconnected from UR controller");
        Ok(())
    }
}
