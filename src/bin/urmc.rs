//! URMC daemon
//!
//! Connects to the robot (or a simulated arm), executes JSON requests read from
//! stdin and streams telemetry to the console or, with the `zenoh-integration`
//! feature, to Zenoh topics.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use urmc::gripper::GripperDriver;
use urmc::telemetry::forward_telemetry;
use urmc::{
    CommandStream, ConsoleTelemetry, Controller, ControllerConfig, SimulatedDriver, SimulatedGripper,
    TelemetryPublisher,
};
#[cfg(not(feature = "zenoh-integration"))]
use urmc::NoOpTelemetry;

const SIMULATED_HOME: [f64; 6] = [0.0, -1.57, 1.57, -1.57, -1.57, 0.0];

#[derive(Parser)]
#[command(name = "urmc")]
#[command(about = "Universal Robots motion command executor")]
#[command(version)]
struct Args {
    /// Path to the controller configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run against a simulated arm instead of a robot
    #[arg(long)]
    simulate: bool,

    /// Print telemetry to stdout
    #[arg(long)]
    console: bool,

    /// Pretty-print console telemetry
    #[arg(long)]
    pretty: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("DEFAULT_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/default_config.yaml".to_string())
    }
}

fn start_controller(args: &Args, config: ControllerConfig) -> Result<Controller> {
    if !args.simulate {
        return Controller::connect(config).context("Failed to connect to robot");
    }
    info!("Simulation mode, no robot connection");
    let driver = Arc::new(SimulatedDriver::new(SIMULATED_HOME));
    let gripper = config
        .gripper()
        .map(|_| Arc::new(SimulatedGripper::new()) as Arc<dyn GripperDriver>);
    Controller::start(config, driver, gripper).context("Failed to start simulated controller")
}

#[cfg(feature = "zenoh-integration")]
async fn telemetry_publisher(
    args: &Args,
    config: &ControllerConfig,
    session: &Arc<zenoh::Session>,
) -> Result<Arc<dyn TelemetryPublisher>> {
    if args.console {
        return Ok(console_publisher(args, config));
    }
    let publisher = urmc::zenoh_transport::ZenohTelemetry::new(session.clone(), &config.publishing.topic_prefix).await?;
    Ok(Arc::new(publisher))
}

fn console_publisher(args: &Args, config: &ControllerConfig) -> Arc<dyn TelemetryPublisher> {
    let rate_hz = config.publishing.console_rate_hz();
    if args.pretty {
        Arc::new(ConsoleTelemetry::pretty(rate_hz))
    } else {
        Arc::new(ConsoleTelemetry::new(rate_hz))
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.get_config_path();
    info!("Universal Robots motion command executor");
    info!("{}", "=".repeat(50));
    info!("Using config: {}", config_path);

    let config = ControllerConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    let mut controller = start_controller(&args, config.clone())?;
    let shutdown = controller.shutdown_signal();

    let ctrlc_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down");
        ctrlc_shutdown.trigger();
    })
    .context("Failed to install Ctrl+C handler")?;

    #[cfg(feature = "zenoh-integration")]
    let session = urmc::zenoh_transport::open_session().await?;

    #[cfg(feature = "zenoh-integration")]
    let publisher = telemetry_publisher(&args, &config, &session).await?;
    #[cfg(not(feature = "zenoh-integration"))]
    let publisher: Arc<dyn TelemetryPublisher> = if args.console {
        console_publisher(&args, &config)
    } else {
        Arc::new(NoOpTelemetry)
    };

    let mut tasks = Vec::new();
    if let Some(streams) = controller.take_telemetry_streams() {
        tasks.push(tokio::spawn(forward_telemetry(publisher, streams, shutdown.clone())));
    }

    #[cfg(feature = "zenoh-integration")]
    {
        let session = session.clone();
        let interface = controller.interface();
        let prefix = config.publishing.topic_prefix.clone();
        let zenoh_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = urmc::zenoh_transport::serve_commands(session, &prefix, interface, zenoh_shutdown).await {
                error!("Zenoh command handling failed: {:#}", e);
            }
        }));
    }

    let stream_shutdown = shutdown.clone();
    let mut stream = CommandStream::stdio(controller.interface(), shutdown.clone());
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream.run().await {
            error!("Command stream error: {}", e);
        }
        let stats = stream.stats();
        info!(
            "Command stream finished: {} received, {} succeeded, {} failed",
            stats.received, stats.succeeded, stats.failed
        );
        // Without a Zenoh transport, end of input ends the session.
        if cfg!(not(feature = "zenoh-integration")) {
            stream_shutdown.trigger();
        }
    });

    info!("Ready for commands");
    while !shutdown.is_triggered() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let result = tokio::task::spawn_blocking(move || controller.shutdown())
        .await
        .context("Shutdown task failed")?;

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    if tokio::time::timeout(Duration::from_millis(200), stream_task).await.is_err() {
        warn!("Command stream still blocked on stdin");
    }

    result.context("Controller stopped with an error")?;
    info!("Shutdown complete");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run(args));
    // Stdin reads occupy a blocking thread that never returns on its own.
    runtime.shutdown_timeout(Duration::from_millis(500));
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
