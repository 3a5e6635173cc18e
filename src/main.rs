//! Standalone binary entry point: brings up a `ClusterMonitor` and exits
//! cleanly on Ctrl+C. Intended as a smoke-test harness, not a deployment
//! artifact — embedding `ClusterMonitor` in a host service is the expected
//! integration path.

use clap::Parser;
use std::sync::Arc;
use vcs_control_plane::{ClusterConfig, ClusterMonitor};

#[derive(Parser, Debug)]
#[command(name = "vcs-control-plane")]
struct Cli {
    #[arg(long, env = "VCS_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = match cli.log_format.as_str() {
        "json" => vcs_control_plane::telemetry::LogFormat::Json,
        _ => vcs_control_plane::telemetry::LogFormat::Pretty,
    };
    vcs_control_plane::telemetry::init_tracing(format);

    let config = ClusterConfig::default();
    let monitor: Arc<ClusterMonitor> = ClusterMonitor::new(config, None)?;
    tracing::info!("cluster monitor started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    monitor.close().await;
    Ok(())
}
