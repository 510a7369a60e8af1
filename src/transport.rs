//! Listener-owning HTTP transport shared by every peer flavor.
//!
//! [`HttpTransport`] owns a peer's bound listener and its stop signal. Concrete peers hold one and
//! delegate [`endpoint`](HttpTransport::endpoint), [`serve`](HttpTransport::serve) and
//! [`stop`](HttpTransport::stop) to it, supplying only the response they want to give.

use std::{
    convert::Infallible,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace, warn};

use crate::{config::TransportConfig, error::PeerError};

/// A bound TCP listener serving HTTP/1.1, plus the signal that shuts it down.
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: String,
    listener: Mutex<Option<TcpListener>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl HttpTransport {
    /// Binds a listener as described by `config`.
    ///
    /// The endpoint is the address actually bound, so an ephemeral port `0` resolves to the port
    /// picked by the OS.
    pub async fn bind(config: &TransportConfig) -> Result<Self, PeerError> {
        let bind_err = |source| PeerError::Bind {
            addr: config.bind_addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(config.bind_addr).await.map_err(bind_err)?;
        let endpoint = listener.local_addr().map_err(bind_err)?.to_string();

        Ok(HttpTransport {
            endpoint,
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// The address this transport listens on.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` once [`stop`](HttpTransport::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Completes once [`stop`](HttpTransport::stop) has been called.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    /// Accepts connections and answers every request with `respond` until stopped.
    ///
    /// Returns `Ok(())` after a stop, once every open connection has been drained, or the accept
    /// error that ended the loop. Only errors that leave the listener unusable end it; transient
    /// ones (such as running out of file descriptors) are logged and retried with a backoff of
    /// 5ms doubling up to 1s, which a stop interrupts. Only the first call serves; later calls (or calls after a stop)
    /// return immediately since the listener is gone.
    pub async fn serve<F>(&self, respond: F) -> Result<(), PeerError>
    where
        F: Fn(&Request<Incoming>) -> Response<Full<Bytes>> + Send + Sync + 'static,
    {
        let Some(listener) = self.listener.lock().take() else {
            return Ok(());
        };
        let respond = Arc::new(respond);
        let connections = self.shutdown.child_token();
        let tracker = TaskTracker::new();

        let mut backoff = AcceptBackoff::default();

        let res = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => {
                            backoff.reset();
                            accepted
                        }
                        Err(err) if is_fatal_accept_error(&err) => {
                            break Err(PeerError::Accept(err));
                        }
                        Err(err) => {
                            let delay = backoff.next_delay();
                            warn!(
                                endpoint = %self.endpoint,
                                error = %err,
                                retry_in = ?delay,
                                "accept failed, retrying"
                            );
                            tokio::select! {
                                biased;
                                _ = self.shutdown.cancelled() => break Ok(()),
                                _ = tokio::time::sleep(delay) => continue,
                            }
                        }
                    };
                    trace!(endpoint = %self.endpoint, %remote, "accepted connection");

                    let respond = Arc::clone(&respond);
                    let service = service_fn(move |req| {
                        let response = respond(&req);
                        async move { Ok::<_, Infallible>(response) }
                    });
                    let closing = connections.clone();
                    tracker.spawn(async move {
                        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                        let mut conn = std::pin::pin!(conn);
                        let mut draining = false;
                        let res = loop {
                            tokio::select! {
                                res = conn.as_mut() => break res,
                                _ = closing.cancelled(), if !draining => {
                                    conn.as_mut().graceful_shutdown();
                                    draining = true;
                                }
                            }
                        };
                        if let Err(err) = res {
                            debug!(%remote, error = %err, "connection closed with error");
                        }
                    });
                }
            }
        };

        drop(listener);
        connections.cancel();
        tracker.close();
        tracker.wait().await;
        res
    }

    /// Signals shutdown and releases the listener.
    ///
    /// Only the first call has any effect; every later or concurrent call returns `Ok(())`
    /// without touching the listener again.
    pub fn stop(&self) -> Result<(), PeerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();
        // Not serving yet: the listener is still parked here and is closed now.
        drop(self.listener.lock().take());
        debug!(endpoint = %self.endpoint, "transport stopped");
        Ok(())
    }
}

/// Accept errors that mean the listener itself is unusable.
///
/// Everything else (a full descriptor table, a connection aborted before it was accepted, an
/// interrupted syscall) only concerns one pending connection or a passing resource shortage.
fn is_fatal_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
    )
}

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Doubling delay between retries of a failing accept, reset by the next successful one.
#[derive(Debug, Default)]
struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => MIN_ACCEPT_BACKOFF,
            Some(prev) => (prev * 2).min(MAX_ACCEPT_BACKOFF),
        };
        self.current = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.current = None;
    }
}
