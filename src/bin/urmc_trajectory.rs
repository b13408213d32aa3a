//! Quintic trajectory generator
//!
//! Prints a single `trajectory` request moving one joint by a fixed offset, ready
//! to be piped into `urmc`.

use anyhow::{Context, Result};
use clap::Parser;
use urmc::messages::{Request, TrajectoryMsg, TrajectoryPointMsg};
use urmc::trajectory::{offset_joint, quintic_joint_trajectory};
use urmc::types::joint_vector_from_slice;

#[derive(Parser)]
#[command(name = "urmc_trajectory")]
#[command(about = "Generate a rest-to-rest quintic joint trajectory request")]
#[command(version)]
struct Args {
    /// Start joint positions in radians, comma separated
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true,
          default_value = "0.0,-1.57,1.57,-1.57,-1.57,0.0")]
    start: Vec<f64>,

    /// Index of the joint to move
    #[arg(long, default_value_t = 0)]
    joint: usize,

    /// Joint displacement in radians
    #[arg(long, default_value_t = -0.5, allow_hyphen_values = true)]
    offset: f64,

    /// Trajectory duration in seconds
    #[arg(long, default_value_t = 5.0)]
    final_time: f64,

    /// Sample period in seconds
    #[arg(long, default_value_t = 0.01)]
    dt: f64,

    /// Pretty-print the request
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let start = joint_vector_from_slice(&args.start, "start")?;
    let goal = offset_joint(&start, args.joint, args.offset)?;
    let waypoints = quintic_joint_trajectory(&start, &goal, args.final_time, args.dt)?;
    eprintln!(
        "Generated {} waypoints moving joint {} by {} rad over {} s",
        waypoints.len(),
        args.joint,
        args.offset,
        args.final_time
    );

    let request = Request::Trajectory(TrajectoryMsg {
        points: waypoints.iter().map(TrajectoryPointMsg::from).collect(),
    });
    let json = if args.pretty {
        serde_json::to_string_pretty(&request)
    } else {
        serde_json::to_string(&request)
    }
    .context("Failed to serialize trajectory request")?;
    println!("{}", json);
    Ok(())
}
