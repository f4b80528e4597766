use clap::Parser;
use flamestore::common::config::{backend_config_from_file, init_logging, BackendConfig};
use flamestore::server::{MasterOptions, MasterServer};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "flamestore-master", version, about = "FlameStore master server", long_about = None)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8650")]
    addr: String,

    /// Workspace directory where the group files are published
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Backend name (memory | distributed)
    #[arg(long, default_value = "memory")]
    backend: String,

    /// Path to a TOML file with backend configuration
    #[arg(long)]
    config: Option<String>,

    /// Log file (stderr when absent)
    #[arg(long)]
    logfile: Option<String>,

    /// Log level: 0=trace 1=debug 2=info 3=warn 4=error
    #[arg(long, default_value_t = 2)]
    loglevel: u8,

    /// Seconds a worker may stay silent before it is declared dead
    #[arg(long, default_value_t = 3)]
    member_deadline: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logfile.as_deref(), cli.loglevel)?;

    let backend_config = match &cli.config {
        Some(path) => backend_config_from_file(path)?,
        None => BackendConfig::new(),
    };
    let server = MasterServer::new(MasterOptions {
        addr: cli.addr,
        workspace: cli.workspace,
        backend: cli.backend,
        backend_config,
        member_deadline: Duration::from_secs(cli.member_deadline),
    })
    .await?;
    tracing::info!(endpoint = server.endpoint(), "master running");
    server.run().await?;
    Ok(())
}
