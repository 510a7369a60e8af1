//! Tunables for peers and their transport.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::gossip::Pacing;

/// Pause between rounds while a peer keeps learning new endpoints.
pub const DEFAULT_DISCOVERING_PAUSE_MS: u64 = 20;

/// Pause between rounds once a round taught the peer nothing new.
pub const DEFAULT_STABLE_PAUSE_MS: u64 = 500;

/// Upper bound for a whole gossip exchange (connect, request, read body).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// How long an idle pooled client connection is kept around.
pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 30;

/// Idle client connections kept per neighbor.
///
/// Zero closes every connection once its reply is read: round-robin polling comes back to a
/// neighbor only after a full sweep of the horizon, and the whole cluster shares one process's
/// descriptor table, so open sockets stay bounded by in-flight requests.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 0;

/// Configuration for the listener-owning transport of a peer.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address to bind. Port `0` asks the OS for an ephemeral port.
    pub bind_addr: SocketAddr,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        }
    }
}

/// Configuration for a [`GossipPeer`](crate::gossip::GossipPeer).
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Listener settings.
    pub transport: TransportConfig,
    /// Pause used while in [`Pacing::Discovering`].
    pub discovering_pause: Duration,
    /// Pause used while in [`Pacing::Stable`].
    pub stable_pause: Duration,
    /// Timeout for one exchange with a neighbor.
    pub request_timeout: Duration,
    /// Idle timeout for pooled client connections.
    pub pool_idle_timeout: Duration,
    /// Maximum idle client connections kept per neighbor.
    pub pool_max_idle_per_host: usize,
}

impl GossipConfig {
    /// Pause to wait before the next round.
    ///
    /// `None` means no round has completed a merge yet, in which case the peer polls right away.
    pub fn pause(&self, pacing: Option<Pacing>) -> Duration {
        match pacing {
            None => Duration::ZERO,
            Some(Pacing::Discovering) => self.discovering_pause,
            Some(Pacing::Stable) => self.stable_pause,
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            discovering_pause: Duration::from_millis(DEFAULT_DISCOVERING_PAUSE_MS),
            stable_pause: Duration::from_millis(DEFAULT_STABLE_PAUSE_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            pool_idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT_SECS),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_follows_pacing() {
        let config = GossipConfig::default();
        assert_eq!(config.pause(None), Duration::ZERO);
        assert_eq!(
            config.pause(Some(Pacing::Discovering)),
            Duration::from_millis(20)
        );
        assert_eq!(config.pause(Some(Pacing::Stable)), Duration::from_millis(500));
    }

    #[test]
    fn client_keeps_no_idle_connections_by_default() {
        assert_eq!(GossipConfig::default().pool_max_idle_per_host, 0);
    }
}
