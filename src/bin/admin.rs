use anyhow::bail;
use clap::{Parser, Subcommand};
use flamestore::client::FlameStoreClient;
use flamestore::common::config::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flamestore-admin", version, about = "FlameStore administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level: 0=trace 1=debug 2=info 3=warn 4=error
    #[arg(long, default_value_t = 3)]
    loglevel: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Gracefully drain and shut down the fleet of a workspace
    Shutdown {
        /// Workspace directory the master published its group files in
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(None, cli.loglevel)?;

    match cli.command {
        Commands::Shutdown { workspace } => {
            let client = FlameStoreClient::connect_workspace(&workspace).await?;
            let status = client.shutdown().await?;
            if !status.is_ok() {
                bail!("master refused shutdown: {}", status.message);
            }
            println!("master acknowledged shutdown");
        }
    }
    Ok(())
}
