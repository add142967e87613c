use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use distributed_lock::{
    cli::{Cli, Command},
    client,
    config::NodeConfig,
    node::{Node, log_status},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Leader(args) => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            serve(Node::new(listener, NodeConfig::from(&args))?).await?;
        }
        Command::Follower(args) => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let node = Node::new(listener, NodeConfig::from(&args))?;
            if let Err(err) = node.register_with_leader().await {
                warn!("continuing without registration: {err:?}");
            }
            serve(node).await?;
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(node: Node) -> Result<()> {
    let addr = node.local_addr()?;
    info!("node listening on {}", addr);
    log_status(&node.handle().status().await);

    if let Err(err) = node.run_until_ctrl_c().await {
        warn!("node exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
