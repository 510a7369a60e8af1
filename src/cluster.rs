//! The cluster orchestrator.
//!
//! A [`ClusterBox`] builds N peers up front, then runs each of them under its own supervising
//! task. Supervision races the peer's server half, its client half and cluster cancellation:
//! whichever finishes first gets the peer stopped, after which the supervisor waits for the
//! remaining half(s) before reporting the peer as terminated. [`ClusterBox::run`] returns once
//! every peer has terminated.

use std::{fmt, future::Future, sync::Arc};

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    error::{ClusterError, PeerError},
    peer::Peer,
};

/// Cancels a whole cluster. Cloneable, and safe to trigger any number of times.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    /// Asks every peer of the cluster to stop. Calls after the first are no-ops.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Returns `true` once [`cancel`](CancelHandle::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Cancels the cluster when the process receives Ctrl-C.
pub fn cancel_on_ctrl_c(handle: CancelHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, cancelling clusterbox");
                handle.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for Ctrl+C"),
        }
    })
}

/// What made a supervisor stop its peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completion {
    /// The server half returned first.
    Server,
    /// The client half returned first.
    Client,
    /// The cluster was cancelled while both halves were running.
    Cancelled,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Server => write!(f, "server done"),
            Completion::Client => write!(f, "client done"),
            Completion::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How one peer terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerExit {
    /// Position of the peer in the cluster.
    pub index: usize,
    /// Endpoint of the peer.
    pub endpoint: String,
    /// Event that triggered the peer's shutdown.
    pub first: Completion,
}

/// Summary returned by [`ClusterBox::run`], ordered by peer index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterReport {
    /// One entry per peer whose supervisor completed.
    pub exits: Vec<PeerExit>,
}

impl ClusterReport {
    /// Number of peers whose shutdown was triggered by `completion`.
    pub fn count(&self, completion: Completion) -> usize {
        self.exits
            .iter()
            .filter(|exit| exit.first == completion)
            .count()
    }
}

/// A fixed set of peers running concurrently inside one process.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use clusterbox::{cluster::ClusterBox, config::TransportConfig, peer::IdlePeer};
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TransportConfig::default();
/// let cluster = ClusterBox::new(3, |_| IdlePeer::bind(&config)).await?;
///
/// let cancel = cluster.canceller();
/// tokio::spawn(async move {
///     tokio::time::sleep(Duration::from_millis(100)).await;
///     cancel.cancel();
/// });
///
/// let report = cluster.run().await;
/// assert_eq!(report.exits.len(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ClusterBox<P> {
    peers: Vec<Arc<P>>,
    cancel: CancellationToken,
}

impl<P: Peer> ClusterBox<P> {
    /// Builds a cluster of `size` peers, calling `factory` once per index in order.
    ///
    /// Fails on the first peer that cannot be built; peers built so far are dropped, so no part
    /// of the cluster is ever started.
    pub async fn new<F, Fut>(size: usize, mut factory: F) -> Result<Self, ClusterError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<P, PeerError>>,
    {
        let mut peers = Vec::with_capacity(size);
        for index in 0..size {
            let peer = factory(index)
                .await
                .map_err(|source| ClusterError::Construction { index, source })?;
            info!(index, endpoint = %peer.endpoint(), "peer listening");
            peers.push(Arc::new(peer));
        }

        Ok(ClusterBox {
            peers,
            cancel: CancellationToken::new(),
        })
    }

    /// Returns a handle that cancels this cluster.
    pub fn canceller(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Endpoints of all peers, in cluster order.
    pub fn endpoints(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|peer| peer.endpoint().to_string())
            .collect()
    }

    /// The peers, in cluster order.
    pub fn peers(&self) -> &[Arc<P>] {
        &self.peers
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if the cluster has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Runs every peer until all of them have terminated.
    ///
    /// Each peer is set up with the full membership, then its server and client halves are
    /// spawned. The peer is stopped as soon as either half returns or the cluster is cancelled,
    /// and is only considered terminated once both halves have returned.
    pub async fn run(self) -> ClusterReport {
        let endpoints: Arc<[String]> = self.endpoints().into();
        let mut supervisors = JoinSet::new();

        for (index, peer) in self.peers.into_iter().enumerate() {
            let span = info_span!("peer", index, endpoint = %peer.endpoint());
            supervisors.spawn(
                supervise(index, peer, Arc::clone(&endpoints), self.cancel.clone()).instrument(span),
            );
        }

        let mut exits = Vec::with_capacity(endpoints.len());
        while let Some(res) = supervisors.join_next().await {
            match res {
                Ok(exit) => exits.push(exit),
                Err(err) => error!(error = %err, "peer supervisor panicked"),
            }
        }
        exits.sort_by_key(|exit| exit.index);
        info!(peers = exits.len(), "clusterbox finished");

        ClusterReport { exits }
    }
}

async fn supervise<P: Peer>(
    index: usize,
    peer: Arc<P>,
    endpoints: Arc<[String]>,
    cancel: CancellationToken,
) -> PeerExit {
    peer.setup(&endpoints);

    // Both halves are aborted if this supervisor is dropped before they return.
    let mut server = AbortOnDropHandle::new(tokio::spawn(
        {
            let peer = Arc::clone(&peer);
            async move { peer.serve().await }
        }
        .in_current_span(),
    ));
    let mut client = AbortOnDropHandle::new(tokio::spawn(
        {
            let peer = Arc::clone(&peer);
            async move { peer.client().await }
        }
        .in_current_span(),
    ));

    let first = tokio::select! {
        res = &mut server => {
            log_half("server", res);
            debug!("waiting for client to close");
            Completion::Server
        }
        res = &mut client => {
            log_half("client", res);
            debug!("waiting for server to close");
            Completion::Client
        }
        _ = cancel.cancelled() => Completion::Cancelled,
    };

    if let Err(err) = peer.stop() {
        error!(error = %err, "failed to stop peer");
    }

    match first {
        Completion::Server => log_half("client", client.await),
        Completion::Client => log_half("server", server.await),
        Completion::Cancelled => {
            log_half("server", server.await);
            log_half("client", client.await);
        }
    }
    info!("closed both client and server");

    PeerExit {
        index,
        endpoint: peer.endpoint().to_string(),
        first,
    }
}

fn log_half(half: &'static str, res: Result<Result<(), PeerError>, JoinError>) {
    match res {
        Ok(Ok(())) => debug!(half, "{half} is done"),
        Ok(Err(err)) => error!(half, error = %err, "{half} finished with error"),
        Err(err) => error!(half, error = %err, "{half} panicked"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::time::timeout;

    use super::*;

    /// Server returns on its own; client waits for `stop`.
    #[derive(Debug, Default)]
    struct ShortServer {
        stops: AtomicUsize,
        stopped: CancellationToken,
    }

    impl Peer for ShortServer {
        fn endpoint(&self) -> &str {
            "short-server"
        }

        fn setup(&self, _endpoints: &[String]) {}

        async fn serve(&self) -> Result<(), PeerError> {
            Ok(())
        }

        async fn client(&self) -> Result<(), PeerError> {
            self.stopped.cancelled().await;
            Ok(())
        }

        fn stop(&self) -> Result<(), PeerError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.stopped.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn server_exit_stops_the_peer() {
        let cluster = ClusterBox::new(4, |_| async { Ok(ShortServer::default()) })
            .await
            .unwrap();
        let peers = cluster.peers().to_vec();

        let report = timeout(Duration::from_secs(5), cluster.run())
            .await
            .unwrap();

        assert_eq!(report.count(Completion::Server), 4);
        for peer in peers {
            assert_eq!(peer.stops.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn construction_failure_aborts_startup() {
        let built = Arc::new(AtomicUsize::new(0));
        let res = ClusterBox::new(5, |index| {
            let built = Arc::clone(&built);
            async move {
                if index == 2 {
                    return Err(PeerError::Timeout {
                        endpoint: "nowhere".to_string(),
                    });
                }
                built.fetch_add(1, Ordering::SeqCst);
                Ok(ShortServer::default())
            }
        })
        .await;

        match res {
            Err(ClusterError::Construction { index, .. }) => assert_eq!(index, 2),
            Ok(_) => panic!("cluster should not have been built"),
        }
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_cluster_finishes_immediately() {
        let cluster = ClusterBox::<ShortServer>::new(0, |_| async { Ok(ShortServer::default()) })
            .await
            .unwrap();
        assert!(cluster.is_empty());
        assert_eq!(cluster.run().await, ClusterReport::default());
    }

    #[test]
    fn cancel_handle_is_idempotent() {
        let handle = CancelHandle::default();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.clone().cancel();
        assert!(handle.is_cancelled());
    }

    /// Server half panics; client waits for `stop`.
    #[derive(Debug, Default)]
    struct PanickingServer {
        stopped: CancellationToken,
    }

    impl Peer for PanickingServer {
        fn endpoint(&self) -> &str {
            "panicking-server"
        }

        fn setup(&self, _endpoints: &[String]) {}

        async fn serve(&self) -> Result<(), PeerError> {
            panic!("server half blew up");
        }

        async fn client(&self) -> Result<(), PeerError> {
            self.stopped.cancelled().await;
            Ok(())
        }

        fn stop(&self) -> Result<(), PeerError> {
            self.stopped.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_half_counts_as_done() {
        let cluster = ClusterBox::new(2, |_| async { Ok(PanickingServer::default()) })
            .await
            .unwrap();
        let peers = cluster.peers().to_vec();

        let report = timeout(Duration::from_secs(5), cluster.run())
            .await
            .unwrap();

        assert_eq!(report.exits.len(), 2);
        assert_eq!(report.count(Completion::Server), 2);
        for peer in peers {
            assert!(peer.stopped.is_cancelled());
        }
    }

    /// Neither half ever returns, and `stop` does nothing.
    #[derive(Debug)]
    struct StuckPeer;

    impl Peer for StuckPeer {
        fn endpoint(&self) -> &str {
            "stuck"
        }

        fn setup(&self, _endpoints: &[String]) {}

        async fn serve(&self) -> Result<(), PeerError> {
            std::future::pending().await
        }

        async fn client(&self) -> Result<(), PeerError> {
            std::future::pending().await
        }

        fn stop(&self) -> Result<(), PeerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dropping_run_aborts_every_half() {
        let cluster = ClusterBox::new(3, |_| async { Ok(StuckPeer) }).await.unwrap();
        let peers = cluster.peers().to_vec();

        assert!(timeout(Duration::from_millis(100), cluster.run())
            .await
            .is_err());

        // Each supervisor and each half holds a reference to its peer until it is dropped.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while peers.iter().any(|peer| Arc::strong_count(peer) > 1) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "halves still running after run was dropped"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
