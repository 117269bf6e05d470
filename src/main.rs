use clap::Parser;
use ledger_raft::{file_logger, start_replica_node, ClusterConfig, ReplicaNodeConfig};
use std::error::Error;
use std::path::PathBuf;
use std::process;

/// Runs one replica of the account ledger.
#[derive(Debug, Parser)]
#[command(name = "ledger-server")]
struct Args {
    /// Which server in the config this process is (0-based).
    index: usize,

    #[arg(long, default_value = "config/config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("ledger-server: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let cluster = ClusterConfig::from_file(&args.config)?;
    let identity = cluster.identity(args.index)?;
    let logger = file_logger(&identity.log_path)?;

    let node = start_replica_node(ReplicaNodeConfig {
        cluster,
        my_index: args.index,
        logger: logger.clone(),
    })
    .await?;
    println!("Replica {} serving on {}", args.index, node.address());

    tokio::signal::ctrl_c().await?;
    slog::info!(logger, "Received ctrl-c");
    node.shutdown().await;

    Ok(())
}
