//! Defines error handling constructs for clusterbox.
//!
//! Errors are split by blast radius: a [`PeerError`] never leaves the peer it happened in (the
//! supervisor logs it and drives that peer's shutdown), while a [`ClusterError`] aborts cluster
//! startup as a whole.

use std::io;

use hyper::{http::uri::InvalidUri, StatusCode};

/// Error raised by a single peer, either while it is being constructed or while one of its
/// halves is running.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The listening socket could not be bound.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        /// Address the peer tried to bind.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Accepting an inbound connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
    /// A known endpoint could not be turned into a request URI.
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        /// The offending endpoint.
        endpoint: String,
        /// URI parse error.
        #[source]
        source: InvalidUri,
    },
    /// The request to a neighbor could not be completed.
    #[error("request to {endpoint} failed: {source}")]
    Request {
        /// Neighbor that was queried.
        endpoint: String,
        /// Transport error.
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    /// The neighbor did not answer in time.
    #[error("request to {endpoint} timed out")]
    Timeout {
        /// Neighbor that was queried.
        endpoint: String,
    },
    /// The neighbor answered with something other than `200 OK`.
    #[error("{endpoint} replied with status {status}")]
    Status {
        /// Neighbor that was queried.
        endpoint: String,
        /// Status code received.
        status: StatusCode,
    },
    /// The reply body broke off or could not be decoded while being read.
    #[error("malformed reply from {endpoint}: {source}")]
    MalformedReply {
        /// Neighbor that was queried.
        endpoint: String,
        /// Stream error hit while reading the body.
        #[source]
        source: io::Error,
    },
}

impl PeerError {
    /// Returns `true` if this error means the reply stream can no longer be trusted.
    ///
    /// A gossip client stops for good on such an error instead of moving on to the next round.
    pub fn is_malformed(&self) -> bool {
        matches!(self, PeerError::MalformedReply { .. })
    }
}

/// Error that prevents a cluster from starting.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The factory failed to build one of the peers.
    #[error("failed to create peer {index}: {source}")]
    Construction {
        /// Position of the peer in the cluster.
        index: usize,
        /// Why the peer could not be built.
        #[source]
        source: PeerError,
    },
}
