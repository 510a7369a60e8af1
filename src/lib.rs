#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod gossip;
pub mod peer;
pub mod registry;
pub mod transport;

pub use cluster::{CancelHandle, ClusterBox, ClusterReport, Completion, PeerExit};
pub use gossip::GossipPeer;
pub use peer::{IdlePeer, Peer};
