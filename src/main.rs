use anyhow::Result;
use chordkv::{repl, Config, Host, Node};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::parse();
    let host: Host = config.host.parse()?;

    let node = Node::<String>::spawn(host).await?;
    if let Some(known) = &config.join {
        node.join(&known.parse()?).await?;
    }
    info!("node {} ready on {}", node.key(), node.host());

    repl::run(node).await
}
