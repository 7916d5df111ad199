#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Survey daemon: flies polygon photo surveys on command.

use std::time::Duration;

use clap::Parser;
use survey_daemon::config::{Args, DaemonConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A blocked stdin read cannot be cancelled, so runtime teardown does not wait on it.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout belongs to the stdio channel; logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DaemonConfig::from_args(&args)?;
    tracing::info!(
        vehicle = %config.vehicle_endpoint,
        channel = ?config.channel,
        ground_speed = config.mission.ground_speed,
        "daemon starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(survey_daemon::app::run(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}
