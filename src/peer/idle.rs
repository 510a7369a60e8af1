use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;

use crate::{config::TransportConfig, error::PeerError, transport::HttpTransport};

use super::Peer;

/// A peer that does nothing but wait to be stopped.
///
/// It keeps a real listener (answering every request with an empty `200 OK`), so it is a
/// faithful stand-in when exercising supervision without any protocol on top.
#[derive(Debug)]
pub struct IdlePeer {
    transport: HttpTransport,
}

impl IdlePeer {
    /// Binds a listener for a new idle peer.
    pub async fn bind(config: &TransportConfig) -> Result<Self, PeerError> {
        Ok(IdlePeer {
            transport: HttpTransport::bind(config).await?,
        })
    }
}

impl Peer for IdlePeer {
    fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    fn setup(&self, _endpoints: &[String]) {}

    async fn serve(&self) -> Result<(), PeerError> {
        self.transport
            .serve(|_| Response::new(Full::new(Bytes::new())))
            .await
    }

    async fn client(&self) -> Result<(), PeerError> {
        self.transport.stopped().await;
        Ok(())
    }

    fn stop(&self) -> Result<(), PeerError> {
        self.transport.stop()
    }
}
