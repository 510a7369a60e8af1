//! Runs a cluster of peers in this process until Ctrl-C.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use clusterbox::{
    cluster::{cancel_on_ctrl_c, ClusterBox, ClusterReport, Completion},
    config::{GossipConfig, TransportConfig},
    peer::Peer,
    GossipPeer, IdlePeer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    /// Peers discover each other by gossip
    Gossip,
    /// Peers only wait to be stopped
    Idle,
}

#[derive(Parser, Debug)]
#[clap(name = "clusterbox", about = "Cluster in a box")]
struct Opt {
    /// Number of peers in the cluster
    #[clap(long, default_value_t = 100)]
    size: usize,
    /// Kind of peer to run
    #[clap(long, value_enum, default_value_t = Kind::Gossip)]
    kind: Kind,
    /// Address each peer binds; port 0 picks an ephemeral port per peer
    #[clap(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opt = Opt::parse();
    let transport = TransportConfig { bind_addr: opt.bind };

    let report = match opt.kind {
        Kind::Gossip => {
            let config = GossipConfig {
                transport,
                ..GossipConfig::default()
            };
            let cluster = ClusterBox::new(opt.size, |_| GossipPeer::bind(config.clone()))
                .await
                .context("failed to start gossip cluster")?;
            run(cluster).await
        }
        Kind::Idle => {
            let cluster = ClusterBox::new(opt.size, |_| IdlePeer::bind(&transport))
                .await
                .context("failed to start idle cluster")?;
            run(cluster).await
        }
    };

    info!(
        peers = report.exits.len(),
        server = report.count(Completion::Server),
        client = report.count(Completion::Client),
        cancelled = report.count(Completion::Cancelled),
        "all peers terminated"
    );

    Ok(())
}

async fn run<P: Peer>(cluster: ClusterBox<P>) -> ClusterReport {
    info!(size = cluster.len(), "clusterbox running, press Ctrl+C to stop");
    let ctrl_c = cancel_on_ctrl_c(cluster.canceller());
    let report = cluster.run().await;
    ctrl_c.abort();
    report
}
