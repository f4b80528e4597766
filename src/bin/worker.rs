use clap::Parser;
use flamestore::common::config::init_logging;
use flamestore::server::{WorkerOptions, WorkerServer};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "flamestore-worker", version, about = "FlameStore storage worker", long_about = None)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:0")]
    addr: String,

    /// Workspace directory the master published its group files in
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Local path the region store lives at
    #[arg(long)]
    storage_path: PathBuf,

    /// Log file (stderr when absent)
    #[arg(long)]
    logfile: Option<String>,

    /// Log level: 0=trace 1=debug 2=info 3=warn 4=error
    #[arg(long, default_value_t = 2)]
    loglevel: u8,

    /// Milliseconds between master heartbeats
    #[arg(long, default_value_t = 500)]
    heartbeat_period: u64,

    /// Consecutive missed heartbeats before the master is considered gone
    #[arg(long, default_value_t = 3)]
    failure_threshold: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logfile.as_deref(), cli.loglevel)?;

    let server = WorkerServer::new(WorkerOptions {
        addr: cli.addr,
        workspace: cli.workspace,
        storage_path: cli.storage_path,
        heartbeat_period: Duration::from_millis(cli.heartbeat_period),
        failure_threshold: cli.failure_threshold,
    })
    .await?;
    tracing::info!(endpoint = server.endpoint(), "worker running");
    server.run().await?;
    Ok(())
}
