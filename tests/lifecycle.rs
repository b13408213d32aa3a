use std::sync::Arc;
use std::time::Duration;

use urmc::messages::{JointGoalMsg, TrajectoryMsg, TrajectoryPointMsg};
use urmc::sim::DriverCall;
use urmc::trajectory::{offset_joint, quintic_joint_trajectory};
use urmc::{Controller, ControllerConfig, Request, SimulatedDriver};

const HOME: [f64; 6] = [0.0, -1.57, 1.57, 0.0, 1.57, 0.0];

fn start() -> (Arc<SimulatedDriver>, Controller) {
    let driver = Arc::new(SimulatedDriver::new(HOME));
    let controller = Controller::start(ControllerConfig::default(), driver.clone(), None).unwrap();
    (driver, controller)
}

#[tokio::test]
async fn generated_trajectory_runs_to_completion() {
    let (driver, mut controller) = start();
    let mut streams = controller.take_telemetry_streams().unwrap();

    let goal = offset_joint(&HOME, 0, -0.5).unwrap();
    let waypoints = quintic_joint_trajectory(&HOME, &goal, 1.0, 0.25).unwrap();
    let request = Request::Trajectory(TrajectoryMsg {
        points: waypoints.iter().map(TrajectoryPointMsg::from).collect(),
    });
    let response = controller.interface().handle(request).await;
    assert!(response.success, "{}", response.message);

    let executed = tokio::time::timeout(Duration::from_secs(2), streams.executed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(executed.goal, "trajectory");
    assert_eq!(executed.motions, 5);

    let targets: Vec<[f64; 6]> = driver
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::MoveJ { positions, .. } => Some(positions),
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 5);
    assert!((targets[4][0] + 0.5).abs() < 1e-12);

    controller.shutdown().unwrap();
    let calls = driver.calls();
    assert_eq!(calls[calls.len() - 2], DriverCall::StopJ(2.0));
    assert_eq!(calls[calls.len() - 1], DriverCall::Disconnect);
}

#[tokio::test]
async fn kinematics_services_round_trip() {
    let (_driver, mut controller) = start();
    let interface = controller.interface();

    let fk = interface
        .handle(Request::ForwardKinematics { positions: HOME.to_vec() })
        .await;
    assert!(fk.success, "{}", fk.message);
    let pose = serde_json::from_value(fk.data.unwrap()).unwrap();

    let ik = interface.handle(Request::InverseKinematics { pose }).await;
    assert!(ik.success, "{}", ik.message);

    let bad = interface
        .handle(Request::JointGoal(JointGoalMsg { positions: vec![0.0; 5], duration: 1.0 }))
        .await;
    assert!(!bad.success);

    controller.shutdown().unwrap();
}
