//! The capability set every simulated cluster member exposes.
//!
//! A [`ClusterBox`](crate::cluster::ClusterBox) only ever talks to its members through the
//! [`Peer`] trait, so it supervises gossiping peers, [`IdlePeer`] placeholders and test doubles
//! alike.
//!
//! # Lifecycle
//! 1. The peer is built by a factory, which binds its listener and fixes its endpoint.
//! 2. [`setup`](Peer::setup) runs once with the full ordered membership.
//! 3. [`serve`](Peer::serve) and [`client`](Peer::client) run concurrently.
//! 4. [`stop`](Peer::stop) is called, possibly several times and from several tasks, after
//!    either half returned or the cluster was cancelled. It makes the remaining half return.

mod idle;

use std::future::Future;

use crate::error::PeerError;

pub use idle::IdlePeer;

/// A cluster member with a server half and a client half.
///
/// # Example
///
/// ```
/// use clusterbox::{config::TransportConfig, peer::{IdlePeer, Peer}};
///
/// # tokio_test::block_on(async {
/// let peer = IdlePeer::bind(&TransportConfig::default()).await?;
/// peer.setup(&[peer.endpoint().to_string()]);
/// peer.stop()?;
/// peer.stop()?; // no-op
/// peer.client().await?;
/// # Ok::<(), clusterbox::error::PeerError>(())
/// # })?;
/// # Ok::<(), clusterbox::error::PeerError>(())
/// ```
pub trait Peer: Send + Sync + 'static {
    /// Stable address of this peer. Has no side effects.
    fn endpoint(&self) -> &str;

    /// One-time initialization with the ordered endpoints of the whole cluster.
    ///
    /// Called exactly once, before [`serve`](Peer::serve) and [`client`](Peer::client) start.
    fn setup(&self, endpoints: &[String]);

    /// Server half. Runs until the listener is closed by [`stop`](Peer::stop) (returning
    /// `Ok(())`) or a transport error ends it.
    fn serve(&self) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Client half. Runs until cancelled by [`stop`](Peer::stop) or until it gives up.
    fn client(&self) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Stops both halves and releases the listener.
    ///
    /// Idempotent under concurrent calls: only the first call has side effects and can return
    /// an error.
    fn stop(&self) -> Result<(), PeerError>;
}
