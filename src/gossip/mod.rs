//! Anti-entropy membership dissemination.
//!
//! A [`GossipPeer`] starts out knowing itself and its two ring successors. Its server half answers
//! every request with a dump of the endpoints it knows; its client half repeatedly picks the next
//! neighbor round-robin, fetches that neighbor's dump and merges whatever is new. While merges
//! keep growing the registry the client polls fast ([`Pacing::Discovering`]); as soon as a round
//! teaches it nothing it backs off ([`Pacing::Stable`]).

mod pacing;
pub mod wire;

use std::{io, sync::Arc};

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    Response, StatusCode, Uri,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};
use parking_lot::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::io::StreamReader;
use tracing::{info, trace, warn};

use crate::{
    config::GossipConfig, error::PeerError, peer::Peer, registry::PeerRegistry,
    transport::HttpTransport,
};

pub use pacing::Pacing;

/// Counters describing what a gossip client has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Rounds that merged a neighbor's dump.
    pub rounds: u64,
    /// Merges that grew the registry.
    pub discovering: u64,
    /// Merges that added nothing.
    pub stable: u64,
    /// Rounds abandoned because the neighbor could not be queried.
    pub failed: u64,
    /// Rounds skipped because there was no neighbor to poll.
    pub skipped: u64,
    /// Current pacing, `None` until the first merge or skipped round.
    pub pacing: Option<Pacing>,
}

/// A peer that discovers the rest of the cluster by gossip.
#[derive(Debug)]
pub struct GossipPeer {
    transport: HttpTransport,
    registry: Arc<PeerRegistry>,
    client: Client<HttpConnector, Empty<Bytes>>,
    config: GossipConfig,
    stats: Mutex<RoundStats>,
}

impl GossipPeer {
    /// Binds a listener and builds a gossip peer with an empty registry.
    pub async fn bind(config: GossipConfig) -> Result<Self, PeerError> {
        let transport = HttpTransport::bind(&config.transport).await?;
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build_http();

        Ok(GossipPeer {
            transport,
            registry: Arc::new(PeerRegistry::new()),
            client,
            config,
            stats: Mutex::new(RoundStats::default()),
        })
    }

    /// The endpoints this peer knows about.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Current pacing of the client half.
    pub fn pacing(&self) -> Option<Pacing> {
        self.stats.lock().pacing
    }

    /// Snapshot of the client half's round counters.
    pub fn stats(&self) -> RoundStats {
        *self.stats.lock()
    }

    /// The configuration this peer was built with.
    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Fetches and decodes the endpoint dump of `endpoint`.
    async fn query(&self, endpoint: &str) -> Result<Vec<String>, PeerError> {
        let uri: Uri = format!("http://{endpoint}/")
            .parse()
            .map_err(|source| PeerError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let exchange = async {
            let response = self
                .client
                .get(uri)
                .await
                .map_err(|source| PeerError::Request {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            if response.status() != StatusCode::OK {
                return Err(PeerError::Status {
                    endpoint: endpoint.to_string(),
                    status: response.status(),
                });
            }

            let body = response.into_body().into_data_stream().map_err(io::Error::other);
            wire::decode(StreamReader::new(body))
                .await
                .map_err(|source| PeerError::MalformedReply {
                    endpoint: endpoint.to_string(),
                    source,
                })
        };

        timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| PeerError::Timeout {
                endpoint: endpoint.to_string(),
            })?
    }

    fn record(&self, f: impl FnOnce(&mut RoundStats)) {
        f(&mut self.stats.lock());
    }
}

impl Peer for GossipPeer {
    fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    fn setup(&self, endpoints: &[String]) {
        self.registry.seed(self.endpoint(), endpoints);
        trace!(
            endpoint = %self.endpoint(),
            neighbors = ?self.registry.endpoints(),
            "seeded registry"
        );
    }

    async fn serve(&self) -> Result<(), PeerError> {
        let registry = Arc::clone(&self.registry);
        self.transport
            .serve(move |_| {
                let mut response = Response::new(Full::new(wire::encode(&registry.endpoints())));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                response
            })
            .await
    }

    async fn client(&self) -> Result<(), PeerError> {
        let mut neighbor = 0;
        let mut pacing = None;

        let res = loop {
            tokio::select! {
                biased;
                _ = self.transport.stopped() => break Ok(()),
                _ = sleep(self.config.pause(pacing)) => {}
            }

            let Some((next, endpoint)) = self.registry.next_neighbor(neighbor) else {
                pacing = Some(Pacing::Stable);
                self.record(|stats| {
                    stats.skipped += 1;
                    stats.pacing = pacing;
                });
                continue;
            };
            neighbor = next;

            let endpoints = match self.query(&endpoint).await {
                Ok(endpoints) => endpoints,
                Err(err) if err.is_malformed() => break Err(err),
                Err(err) => {
                    warn!(endpoint = %self.endpoint(), error = %err, "gossip round failed");
                    self.record(|stats| stats.failed += 1);
                    continue;
                }
            };

            let (size_before, size_after) = self.registry.merge(&endpoints);
            let next_pacing = Pacing::after_merge(size_before, size_after);
            if next_pacing == Pacing::Discovering {
                self.registry.increment_horizon();
                info!(endpoint = %self.endpoint(), known = size_after, "now knows {size_after} peers");
            }
            pacing = Some(next_pacing);
            self.record(|stats| {
                stats.rounds += 1;
                match next_pacing {
                    Pacing::Discovering => stats.discovering += 1,
                    Pacing::Stable => stats.stable += 1,
                }
                stats.pacing = pacing;
            });
        };

        info!(
            endpoint = %self.endpoint(),
            known = self.registry.size(),
            "client exits knowing {} peers",
            self.registry.size()
        );
        res
    }

    fn stop(&self) -> Result<(), PeerError> {
        self.transport.stop()
    }
}
