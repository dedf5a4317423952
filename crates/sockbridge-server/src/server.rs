//! [`BridgeServer`] – TCP accept loop.
//!
//! Binds a listener, spawns one [`serve_connection`] task per client, and
//! shares a single [`Dispatcher`] (and therefore a single channel registry)
//! between all of them.
//!
//! On shutdown the listener is dropped so no new clients are accepted, every
//! connection task is told to finish through the shared
//! [`CancellationToken`], and [`BridgeServer::run`] returns once all of them
//! have exited.

use std::net::SocketAddr;
use std::sync::Arc;

use sockbridge_types::BridgeError;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::handler::{Dispatcher, serve_connection};

/// TCP server bridging socket clients to the bus.
pub struct BridgeServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    max_frame_len: usize,
}

impl BridgeServer {
    /// Bind to `addr`.
    ///
    /// Binding happens here rather than in [`run`][Self::run] so the caller
    /// can read [`local_addr`][Self::local_addr] (e.g. after binding port 0).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the listener cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs, dispatcher: Arc<Dispatcher>) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Override the maximum request line length (builder-style).
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Accept clients until `shutdown` is cancelled, then wait for every
    /// open connection to finish.
    ///
    /// Accept errors are logged and do not stop the server; a failing
    /// connection only affects itself.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        let addr = self.local_addr()?;
        info!(%addr, "sockbridge listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let token = shutdown.child_token();
                            let max_frame_len = self.max_frame_len;
                            let span = info_span!("connection", %peer);
                            connections.spawn(
                                async move {
                                    info!("client connected");
                                    match serve_connection(stream, dispatcher, max_frame_len, token).await {
                                        Ok(()) => info!("connection closed"),
                                        Err(e) => warn!(error = %e, "connection closed with error"),
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(self.listener);
        info!(open_connections = connections.len(), "shutting down; draining connections");
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "connection task failed");
            }
        }
        info!("sockbridge stopped");
        Ok(())
    }
}
